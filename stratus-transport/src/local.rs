//! In-process transport.

use std::sync::Arc;

use dashmap::DashMap;

use stratus_core::{BoxFuture, Endpoint, Envelope, EnvelopeKind, MessageHandler, MessageSender, TransportError};

use crate::client::{ConnectFuture, Connector, TransportClient};
use crate::mux::Multiplexer;

type Handlers = Arc<DashMap<Endpoint, Arc<dyn MessageHandler>>>;

/// Routes endpoints to in-process [`MessageHandler`]s.
///
/// Connecting to an endpoint with no registered handler fails like a
/// refused TCP connect. Unregistering an endpoint kills its open
/// connections on their next send, which makes it a convenient stand-in
/// for a node going down.
#[derive(Clone, Default)]
pub struct LocalConnector {
    handlers: Handlers,
}

impl LocalConnector {
    /// Create an empty connector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `endpoint` with `handler`, replacing any previous handler.
    pub fn register(&self, endpoint: Endpoint, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(endpoint, handler);
    }

    /// Stop serving `endpoint`.
    pub fn unregister(&self, endpoint: &Endpoint) -> bool {
        self.handlers.remove(endpoint).is_some()
    }

    /// Whether `endpoint` has a handler.
    #[must_use]
    pub fn is_registered(&self, endpoint: &Endpoint) -> bool {
        self.handlers.contains_key(endpoint)
    }
}

impl Connector for LocalConnector {
    fn connect(&self, endpoint: &Endpoint) -> ConnectFuture {
        let handlers = self.handlers.clone();
        let endpoint = endpoint.clone();

        Box::pin(async move {
            if !handlers.contains_key(&endpoint) {
                return Err(TransportError::ConnectionFailed(format!(
                    "{endpoint}: no local handler"
                )));
            }
            let mux = Arc::new(Multiplexer::new());
            let sender = LocalSender {
                endpoint: endpoint.clone(),
                handlers,
                mux: mux.clone(),
            };
            Ok(Arc::new(TransportClient::new(endpoint, mux, Arc::new(sender))))
        })
    }
}

struct LocalSender {
    endpoint: Endpoint,
    handlers: Handlers,
    mux: Arc<Multiplexer>,
}

impl LocalSender {
    fn deliver(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.mux.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        let Some(handler) = self.handlers.get(&self.endpoint).map(|h| h.value().clone()) else {
            self.mux.close();
            return Err(TransportError::ConnectionClosed);
        };

        let mux = self.mux.clone();
        tokio::spawn(async move {
            let reply = match envelope.kind {
                EnvelopeKind::Ping => Envelope::pong(envelope.correlation_id),
                _ => handler.handle(envelope).await,
            };
            mux.dispatch(reply);
        });
        Ok(())
    }
}

impl MessageSender for LocalSender {
    fn send(&self, envelope: Envelope) -> BoxFuture<'_, Result<(), TransportError>> {
        let result = self.deliver(envelope);
        Box::pin(async move { result })
    }

    fn send_and_close(&self, envelope: Envelope) -> BoxFuture<'_, Result<(), TransportError>> {
        let result = self.deliver(envelope);
        self.mux.close();
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use stratus_core::{Params, StratusError};

    struct Constant(i64);

    impl MessageHandler for Constant {
        fn handle(&self, envelope: Envelope) -> BoxFuture<'_, Envelope> {
            Box::pin(async move {
                Envelope::result(envelope.correlation_id, envelope.route, &self.0.into()).unwrap()
            })
        }
    }

    fn ep() -> Endpoint {
        Endpoint::new("local", 1)
    }

    #[tokio::test]
    async fn test_local_round_trip() {
        let connector = LocalConnector::new();
        connector.register(ep(), Arc::new(Constant(42)));

        let client = connector.connect(&ep()).await.unwrap();
        let request = Envelope::invoke(0, "answer", None, &Params::new()).unwrap();
        let reply = client.send(request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.into_outcome().unwrap(), 42);
        client.ping(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_endpoint_refuses() {
        let connector = LocalConnector::new();
        let err = connector.connect(&ep()).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_unregister_kills_open_connection() {
        let connector = LocalConnector::new();
        connector.register(ep(), Arc::new(Constant(1)));
        let client = connector.connect(&ep()).await.unwrap();

        assert!(connector.unregister(&ep()));
        let err = client.ping(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, StratusError::Transport(TransportError::ConnectionClosed)));
        assert!(!client.is_alive());
    }
}
