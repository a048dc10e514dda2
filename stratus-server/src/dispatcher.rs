//! Inbound message → bound method → reply envelope.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use stratus_core::{
    BoxFuture, Envelope, EnvelopeKind, MessageHandler, MessageSender, RemoteFault, TransportError,
};

use crate::inbound::{Inbound, InboundMessage};
use crate::registry::ServiceRegistry;

/// Executes inbound messages against a [`ServiceRegistry`].
///
/// Every outcome becomes a reply envelope carrying the inbound correlation
/// id: unknown routes are `NOT_FOUND`, argument coercion failures are
/// `INVALID_ARGUMENT`, handler panics are `INTERNAL`. Nothing a handler
/// does can escape into the listener that called the dispatcher.
#[derive(Clone)]
pub struct ServiceDispatcher {
    registry: Arc<ServiceRegistry>,
}

impl ServiceDispatcher {
    /// Create a dispatcher over a registry.
    #[must_use]
    pub fn new(registry: ServiceRegistry) -> Self {
        Self::from_shared(Arc::new(registry))
    }

    /// Create a dispatcher over a shared registry.
    #[must_use]
    pub fn from_shared(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// The route table.
    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Handle an RPC envelope.
    ///
    /// `Invoke` runs the bound method and `Ping` is answered with `Pong`.
    /// Response kinds cannot be dispatched and get an `INVALID_ARGUMENT`
    /// fault.
    pub async fn dispatch(&self, envelope: Envelope) -> Envelope {
        match envelope.kind {
            EnvelopeKind::Invoke => self.execute(&envelope).await,
            EnvelopeKind::Ping => Envelope::pong(envelope.correlation_id),
            kind @ (EnvelopeKind::Result | EnvelopeKind::Fault | EnvelopeKind::Pong) => {
                tracing::debug!(correlation_id = envelope.correlation_id, ?kind, "undispatchable envelope");
                Envelope::fault(
                    envelope.correlation_id,
                    envelope.route,
                    RemoteFault::new(RemoteFault::INVALID_ARGUMENT, format!("cannot dispatch a {kind:?} envelope")),
                )
            }
        }
    }

    /// Look up and run the method bound to an inbound message's route.
    pub async fn execute<M>(&self, inbound: &M) -> Envelope
    where
        M: InboundMessage + Sync + ?Sized,
    {
        let id = inbound.correlation_id();
        let route = inbound.route_key().to_owned();

        let Some(entry) = self.registry.lookup(&route, inbound.service_key()) else {
            tracing::warn!(route = %route, service_key = ?inbound.service_key(), "no method bound to route");
            let fault = RemoteFault::new(RemoteFault::NOT_FOUND, format!("no method bound to '{route}'"));
            return Envelope::fault(id, route, fault);
        };

        let params = match inbound.params() {
            Ok(params) => params,
            Err(e) => {
                let fault = RemoteFault::new(RemoteFault::INVALID_ARGUMENT, e.to_string());
                return Envelope::fault(id, route, fault);
            }
        };

        let outcome = AssertUnwindSafe(async { entry.call(params).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                tracing::error!(route = %route, correlation_id = id, panic = message, "service method panicked");
                Err(RemoteFault::new(RemoteFault::INTERNAL, format!("service method panicked: {message}")))
            });

        match outcome {
            Ok(value) => Envelope::result(id, route.clone(), &value).unwrap_or_else(|e| {
                Envelope::fault(id, route, RemoteFault::new(RemoteFault::INTERNAL, e.to_string()))
            }),
            Err(fault) => {
                tracing::debug!(route = %route, correlation_id = id, code = fault.code, "service method failed");
                Envelope::fault(id, route, fault)
            }
        }
    }

    /// Dispatch an inbound message and write the reply to its channel.
    ///
    /// One-shot kinds (HTTP, DNS) close the channel after the reply.
    pub async fn on_message(
        &self,
        sender: &dyn MessageSender,
        inbound: impl Into<Inbound>,
    ) -> Result<(), TransportError> {
        let inbound = inbound.into();
        let one_shot = inbound.one_shot();
        tracing::trace!(kind = inbound.kind(), route = inbound.route_key(), "inbound message");
        let reply = match inbound {
            Inbound::Rpc(envelope) => self.dispatch(envelope).await,
            other => self.execute(&other).await,
        };

        let result = if one_shot {
            sender.send_and_close(reply).await
        } else {
            sender.send(reply).await
        };
        if let Err(e) = &result {
            tracing::debug!(error = %e, "failed to write reply");
        }
        result
    }
}

impl MessageHandler for ServiceDispatcher {
    fn handle(&self, envelope: Envelope) -> BoxFuture<'_, Envelope> {
        Box::pin(self.dispatch(envelope))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
