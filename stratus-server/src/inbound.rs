//! Inbound message kinds and their route-key extraction.
//!
//! Every wire protocol a listener speaks decodes into one of these kinds.
//! Each kind knows where its route key and arguments live; all of them
//! resolve against the same [`ServiceRegistry`](crate::ServiceRegistry).

use serde_json::Value;

use stratus_core::{CodecError, Envelope, Params};

/// What the dispatcher needs from an inbound message.
pub trait InboundMessage {
    /// Correlation id to put on the reply.
    fn correlation_id(&self) -> u64;

    /// Raw route key; the registry normalises it.
    fn route_key(&self) -> &str;

    /// Service key selecting a keyed binding.
    fn service_key(&self) -> Option<&str> {
        None
    }

    /// Arguments as a parameter map.
    fn params(&self) -> Result<Params, CodecError>;

    /// Whether the channel closes after the reply.
    fn one_shot(&self) -> bool {
        false
    }
}

impl InboundMessage for Envelope {
    fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    fn route_key(&self) -> &str {
        &self.route
    }

    fn service_key(&self) -> Option<&str> {
        self.service_key.as_deref()
    }

    fn params(&self) -> Result<Params, CodecError> {
        Envelope::params(self)
    }
}

/// An HTTP request routed by path.
///
/// The JSON object body and the query string together form the parameter
/// map; query values are strings and win over body fields of the same name.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    /// Correlation id assigned by the listener.
    pub id: u64,
    /// Request method.
    pub method: String,
    /// Request target, query string included.
    pub path: String,
    /// Request body.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Create a request.
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            path: path.into(),
            body: Vec::new(),
        }
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    fn split_target(&self) -> (&str, Option<&str>) {
        match self.path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.path.as_str(), None),
        }
    }
}

impl InboundMessage for HttpRequest {
    fn correlation_id(&self) -> u64 {
        self.id
    }

    fn route_key(&self) -> &str {
        self.split_target().0
    }

    fn params(&self) -> Result<Params, CodecError> {
        let mut params = if self.body.iter().all(u8::is_ascii_whitespace) {
            Params::new()
        } else {
            match serde_json::from_slice(&self.body).map_err(CodecError::from)? {
                Value::Object(map) => map,
                other => {
                    return Err(CodecError::Deserialization(format!(
                        "request body must be a JSON object, got {other}"
                    )));
                }
            }
        };

        if let Some(query) = self.split_target().1 {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                params.insert(key.to_owned(), Value::String(value.to_owned()));
            }
        }
        Ok(params)
    }

    fn one_shot(&self) -> bool {
        true
    }
}

/// A DNS question routed by query name.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    /// Transaction id.
    pub id: u16,
    /// Queried name, with or without the trailing root dot.
    pub name: String,
    /// Numeric record type.
    pub record_type: u16,
}

impl DnsQuery {
    /// Create a query.
    #[must_use]
    pub fn new(id: u16, name: impl Into<String>, record_type: u16) -> Self {
        Self {
            id,
            name: name.into(),
            record_type,
        }
    }
}

impl InboundMessage for DnsQuery {
    fn correlation_id(&self) -> u64 {
        u64::from(self.id)
    }

    fn route_key(&self) -> &str {
        self.name.trim_end_matches('.')
    }

    fn params(&self) -> Result<Params, CodecError> {
        let mut params = Params::new();
        params.insert("name".into(), Value::String(self.route_key().to_owned()));
        params.insert("record_type".into(), Value::from(self.record_type));
        Ok(params)
    }

    fn one_shot(&self) -> bool {
        true
    }
}

/// An opaque payload on a channel bound to one route.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Correlation id assigned by the listener.
    pub id: u64,
    /// Route the channel is bound to.
    pub route: String,
    /// Message bytes.
    pub payload: Vec<u8>,
}

impl RawMessage {
    /// Create a raw message.
    #[must_use]
    pub fn new(id: u64, route: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            route: route.into(),
            payload: payload.into(),
        }
    }
}

impl InboundMessage for RawMessage {
    fn correlation_id(&self) -> u64 {
        self.id
    }

    fn route_key(&self) -> &str {
        &self.route
    }

    /// The payload is passed as a `payload` string; invalid UTF-8 is
    /// replaced.
    fn params(&self) -> Result<Params, CodecError> {
        let mut params = Params::new();
        params.insert(
            "payload".into(),
            Value::String(String::from_utf8_lossy(&self.payload).into_owned()),
        );
        Ok(params)
    }
}

/// Any inbound message the dispatcher accepts.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Stratus RPC envelope.
    Rpc(Envelope),
    /// HTTP request.
    Http(HttpRequest),
    /// DNS question.
    Dns(DnsQuery),
    /// Opaque payload.
    Raw(RawMessage),
}

impl Inbound {
    fn inner(&self) -> &dyn InboundMessage {
        match self {
            Self::Rpc(m) => m,
            Self::Http(m) => m,
            Self::Dns(m) => m,
            Self::Raw(m) => m,
        }
    }

    /// Short name of the kind, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rpc(_) => "rpc",
            Self::Http(_) => "http",
            Self::Dns(_) => "dns",
            Self::Raw(_) => "raw",
        }
    }
}

impl InboundMessage for Inbound {
    fn correlation_id(&self) -> u64 {
        self.inner().correlation_id()
    }

    fn route_key(&self) -> &str {
        self.inner().route_key()
    }

    fn service_key(&self) -> Option<&str> {
        self.inner().service_key()
    }

    fn params(&self) -> Result<Params, CodecError> {
        self.inner().params()
    }

    fn one_shot(&self) -> bool {
        self.inner().one_shot()
    }
}

impl From<Envelope> for Inbound {
    fn from(envelope: Envelope) -> Self {
        Self::Rpc(envelope)
    }
}

impl From<HttpRequest> for Inbound {
    fn from(request: HttpRequest) -> Self {
        Self::Http(request)
    }
}

impl From<DnsQuery> for Inbound {
    fn from(query: DnsQuery) -> Self {
        Self::Dns(query)
    }
}

impl From<RawMessage> for Inbound {
    fn from(message: RawMessage) -> Self {
        Self::Raw(message)
    }
}
