//! Route table of bound service methods.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use stratus_core::{BoxFuture, Params, RemoteFault, StratusError};

/// Type-erased bound method: coerces the parameter map, runs the handler
/// and encodes its outcome.
type HandlerFn = dyn Fn(Params) -> BoxFuture<'static, Result<Value, RemoteFault>> + Send + Sync;

/// Canonical form of a route key: surrounding `/` and whitespace removed,
/// lowercased.
#[must_use]
pub fn normalize_route(route: &str) -> String {
    route.trim().trim_matches('/').to_ascii_lowercase()
}

/// One bound method.
#[derive(Clone)]
pub struct ServiceEntry {
    route: Arc<str>,
    service_key: Option<Arc<str>>,
    handler: Arc<HandlerFn>,
}

impl ServiceEntry {
    fn new<A, R, F, Fut>(route: String, service_key: Option<String>, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, StratusError>> + Send + 'static,
    {
        let erased = move |params: Params| -> BoxFuture<'static, Result<Value, RemoteFault>> {
            let args = match coerce::<A>(params) {
                Ok(args) => args,
                Err(e) => {
                    let fault = RemoteFault::new(RemoteFault::INVALID_ARGUMENT, format!("invalid arguments: {e}"));
                    return Box::pin(async move { Err(fault) });
                }
            };
            let call = handler(args);
            Box::pin(async move {
                let value = call.await.map_err(into_fault)?;
                serde_json::to_value(&value)
                    .map_err(|e| RemoteFault::new(RemoteFault::INTERNAL, format!("unserializable result: {e}")))
            })
        };

        Self {
            route: route.into(),
            service_key: service_key.map(Into::into),
            handler: Arc::new(erased),
        }
    }

    /// Normalised route key.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Service key this entry is bound under, if any.
    #[must_use]
    pub fn service_key(&self) -> Option<&str> {
        self.service_key.as_deref()
    }

    /// Run the bound method. Panics are not caught here.
    pub fn call(&self, params: Params) -> BoxFuture<'static, Result<Value, RemoteFault>> {
        (self.handler)(params)
    }
}

impl fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("route", &self.route)
            .field("service_key", &self.service_key)
            .finish_non_exhaustive()
    }
}

/// Parameter maps become the handler's argument type. An empty map also
/// satisfies argument types that expect nothing (`()`, `Option<T>`).
fn coerce<A: DeserializeOwned>(params: Params) -> Result<A, serde_json::Error> {
    let empty = params.is_empty();
    match serde_json::from_value(Value::Object(params)) {
        Ok(args) => Ok(args),
        Err(_) if empty => serde_json::from_value(Value::Null),
        Err(e) => Err(e),
    }
}

fn into_fault(error: StratusError) -> RemoteFault {
    match error {
        StratusError::Remote { code, message } => RemoteFault { code, message },
        StratusError::Codec(e) => RemoteFault::new(RemoteFault::INVALID_ARGUMENT, e.to_string()),
        StratusError::Timeout(_) => RemoteFault::new(RemoteFault::DEADLINE_EXCEEDED, error.to_string()),
        StratusError::Cancelled => RemoteFault::new(RemoteFault::CANCELLED, error.to_string()),
        StratusError::Rejected(_) => RemoteFault::new(RemoteFault::PERMISSION_DENIED, error.to_string()),
        StratusError::NoCandidate(_) | StratusError::Transport(_) => {
            RemoteFault::new(RemoteFault::UNAVAILABLE, error.to_string())
        }
    }
}

#[derive(Default)]
struct RouteEntries {
    unkeyed: Option<ServiceEntry>,
    keyed: HashMap<String, ServiceEntry>,
}

/// Read-only table of [`ServiceEntry`]s, built once at startup.
///
/// Lookup is by normalised route key and service key; a keyed lookup with
/// no keyed binding falls back to the route's un-keyed entry.
#[derive(Default)]
pub struct ServiceRegistry {
    routes: HashMap<String, RouteEntries>,
}

impl ServiceRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    /// Find the entry for `route` (normalised here) and `service_key`.
    #[must_use]
    pub fn lookup(&self, route: &str, service_key: Option<&str>) -> Option<&ServiceEntry> {
        let entries = self.routes.get(&normalize_route(route))?;
        service_key
            .and_then(|key| entries.keyed.get(key))
            .or(entries.unkeyed.as_ref())
    }

    /// Number of bound methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes
            .values()
            .map(|e| e.keyed.len() + usize::from(e.unkeyed.is_some()))
            .sum()
    }

    /// Check if no method is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All bound entries, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = &ServiceEntry> {
        self.routes
            .values()
            .flat_map(|e| e.unkeyed.iter().chain(e.keyed.values()))
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries()).finish()
    }
}

/// Builder for [`ServiceRegistry`].
#[derive(Default)]
pub struct ServiceRegistryBuilder {
    routes: HashMap<String, RouteEntries>,
}

impl ServiceRegistryBuilder {
    /// Bind `handler` to `route` for every service key without its own
    /// binding.
    ///
    /// The handler's argument type is deserialized from the request's
    /// parameter map; returning [`StratusError::Remote`] sends that code
    /// and message back to the caller.
    #[must_use]
    pub fn register<A, R, F, Fut>(self, route: &str, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, StratusError>> + Send + 'static,
    {
        self.insert(ServiceEntry::new(normalize_route(route), None, handler))
    }

    /// Bind `handler` to `route` under one service key.
    #[must_use]
    pub fn register_keyed<A, R, F, Fut>(self, route: &str, service_key: &str, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, StratusError>> + Send + 'static,
    {
        self.insert(ServiceEntry::new(
            normalize_route(route),
            Some(service_key.to_owned()),
            handler,
        ))
    }

    fn insert(mut self, entry: ServiceEntry) -> Self {
        let entries = self.routes.entry(entry.route().to_owned()).or_default();
        let replaced = match entry.service_key() {
            Some(key) => entries.keyed.insert(key.to_owned(), entry.clone()),
            None => entries.unkeyed.replace(entry.clone()),
        };
        if replaced.is_some() {
            tracing::warn!(route = entry.route(), service_key = ?entry.service_key(), "replacing bound method");
        } else {
            tracing::debug!(route = entry.route(), service_key = ?entry.service_key(), "bound method");
        }
        self
    }

    /// Freeze the table.
    #[must_use]
    pub fn build(self) -> ServiceRegistry {
        ServiceRegistry { routes: self.routes }
    }
}
