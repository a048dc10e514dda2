//! Service identity and endpoint value types.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;

/// Logical identity of a remote service.
///
/// Descriptors are immutable and cheap to clone; they key route tables,
/// selector counters and the server-side entry table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceDescriptor {
    inner: Arc<DescriptorInner>,
}

#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct DescriptorInner {
    service_id: String,
    group: Option<String>,
    version: Option<String>,
    service_key: Option<String>,
}

impl ServiceDescriptor {
    /// Create a descriptor for a service id.
    #[must_use]
    pub fn new(service_id: impl Into<String>) -> Self {
        Self::builder(service_id).build()
    }

    /// Start building a descriptor with optional group, version and key.
    #[must_use]
    pub fn builder(service_id: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            service_id: service_id.into(),
            group: None,
            version: None,
            service_key: None,
        }
    }

    /// The service id, also the route key used on the wire.
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.inner.service_id
    }

    /// Optional group.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.inner.group.as_deref()
    }

    /// Optional version.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.inner.version.as_deref()
    }

    /// Optional service key selecting a tenant-specific binding.
    #[must_use]
    pub fn service_key(&self) -> Option<&str> {
        self.inner.service_key.as_deref()
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.service_id)?;
        if let Some(group) = &self.inner.group {
            write!(f, "@{group}")?;
        }
        if let Some(version) = &self.inner.version {
            write!(f, ":{version}")?;
        }
        if let Some(key) = &self.inner.service_key {
            write!(f, "#{key}")?;
        }
        Ok(())
    }
}

/// Builder for [`ServiceDescriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    service_id: String,
    group: Option<String>,
    version: Option<String>,
    service_key: Option<String>,
}

impl DescriptorBuilder {
    /// Set the group.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set the version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the service key.
    #[must_use]
    pub fn service_key(mut self, key: impl Into<String>) -> Self {
        self.service_key = Some(key.into());
        self
    }

    /// Finish the descriptor.
    #[must_use]
    pub fn build(self) -> ServiceDescriptor {
        ServiceDescriptor {
            inner: Arc::new(DescriptorInner {
                service_id: self.service_id,
                group: self.group,
                version: self.version,
                service_key: self.service_key,
            }),
        }
    }
}

/// A concrete host and port a service instance listens on.
///
/// Equality and hashing consider only host and port; the optional
/// security token travels with the endpoint but does not identify it.
#[derive(Debug, Clone)]
pub struct Endpoint {
    host: Arc<str>,
    port: u16,
    token: Option<Arc<str>>,
}

impl Endpoint {
    /// Create an endpoint from host and port.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Arc::from(host.into()),
            port,
            token: None,
        }
    }

    /// Attach a security token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(Arc::from(token.into()));
        self
    }

    /// Host name or IP literal.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port number.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Security token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// `host:port`, suitable for socket connect calls.
    #[must_use]
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.host == other.host
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}
