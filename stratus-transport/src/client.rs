//! Multiplexed client connection.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use stratus_core::{BoxFuture, Endpoint, Envelope, EnvelopeKind, MessageSender, StratusError, TransportError};

use crate::mux::Multiplexer;

/// Future returned by [`Connector::connect`].
pub type ConnectFuture = BoxFuture<'static, Result<Arc<TransportClient>, TransportError>>;

/// Establishes client connections for one wire protocol.
///
/// `connect` must not do any work before the returned future is polled.
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to the endpoint.
    fn connect(&self, endpoint: &Endpoint) -> ConnectFuture;
}

/// One live connection to one endpoint, shared by any number of
/// concurrent callers.
///
/// Requests are tagged with a fresh correlation id and written through
/// the sender; the connection's receive path completes them through the
/// shared [`Multiplexer`]. A request that exceeds its deadline is dropped
/// from the pending table without closing the connection.
pub struct TransportClient {
    endpoint: Endpoint,
    mux: Arc<Multiplexer>,
    sender: Arc<dyn MessageSender>,
}

impl TransportClient {
    /// Wrap a connected channel.
    ///
    /// `mux` must be the multiplexer the channel's receive path dispatches
    /// into; closing the channel must close it.
    pub fn new(endpoint: Endpoint, mux: Arc<Multiplexer>, sender: Arc<dyn MessageSender>) -> Self {
        Self {
            endpoint,
            mux,
            sender,
        }
    }

    /// The remote endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the underlying channel is still open.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.mux.is_closed()
    }

    /// Requests currently awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.mux.pending_count()
    }

    /// Send a request and wait for its correlated response.
    ///
    /// The request's correlation id is overwritten. Remote faults come back
    /// as `Ok` fault envelopes; interpreting them is up to the caller.
    pub async fn send(&self, mut request: Envelope, timeout: Duration) -> Result<Envelope, StratusError> {
        if !self.is_alive() {
            return Err(TransportError::ConnectionClosed.into());
        }

        let (id, rx) = self.mux.register();
        request.correlation_id = id;
        let _pending = PendingGuard { mux: &self.mux, id };

        self.sender.send(request).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StratusError::Cancelled),
            Err(_) => {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    correlation_id = id,
                    ?timeout,
                    "request timed out"
                );
                Err(StratusError::Timeout(timeout))
            }
        }
    }

    /// Round-trip a ping frame.
    pub async fn ping(&self, timeout: Duration) -> Result<Duration, StratusError> {
        let start = Instant::now();
        let reply = self.send(Envelope::ping(0), timeout).await?;
        if reply.kind != EnvelopeKind::Pong {
            return Err(TransportError::Protocol(format!("expected pong, got {:?}", reply.kind)).into());
        }
        Ok(start.elapsed())
    }

    /// Close the connection, failing every pending request.
    pub fn close(&self) {
        self.mux.close();
    }
}

impl fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportClient")
            .field("endpoint", &self.endpoint)
            .field("alive", &self.is_alive())
            .field("pending", &self.mux.pending_count())
            .finish()
    }
}

/// Removes the slot if the caller stops waiting before a response lands.
struct PendingGuard<'a> {
    mux: &'a Multiplexer,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.mux.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records sent envelopes; the test plays the remote side.
    struct RecordingSender {
        sent: Arc<Mutex<Vec<Envelope>>>,
        fail: bool,
    }

    impl MessageSender for RecordingSender {
        fn send(&self, envelope: Envelope) -> BoxFuture<'_, Result<(), TransportError>> {
            let result = if self.fail {
                Err(TransportError::ConnectionClosed)
            } else {
                self.sent.lock().push(envelope);
                Ok(())
            };
            Box::pin(async move { result })
        }

        fn send_and_close(&self, envelope: Envelope) -> BoxFuture<'_, Result<(), TransportError>> {
            self.send(envelope)
        }
    }

    fn client(fail: bool) -> (Arc<TransportClient>, Arc<Multiplexer>, Arc<Mutex<Vec<Envelope>>>) {
        let mux = Arc::new(Multiplexer::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sender = RecordingSender {
            sent: sent.clone(),
            fail,
        };
        let client = TransportClient::new(Endpoint::new("127.0.0.1", 1), mux.clone(), Arc::new(sender));
        (Arc::new(client), mux, sent)
    }

    async fn wait_for_sent(sent: &Mutex<Vec<Envelope>>, n: usize) {
        while sent.lock().len() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_complete_out_of_order() {
        let (client, mux, sent) = client(false);

        let c1 = client.clone();
        let first = tokio::spawn(async move { c1.send(Envelope::ping(0), Duration::from_secs(5)).await });
        let c2 = client.clone();
        let second = tokio::spawn(async move { c2.send(Envelope::ping(0), Duration::from_secs(5)).await });

        wait_for_sent(&sent, 2).await;
        let ids: Vec<u64> = sent.lock().iter().map(|e| e.correlation_id).collect();
        assert_ne!(ids[0], ids[1]);

        mux.dispatch(Envelope::pong(ids[1]));
        mux.dispatch(Envelope::pong(ids[0]));

        let mut got = vec![
            first.await.unwrap().unwrap().correlation_id,
            second.await.unwrap().unwrap().correlation_id,
        ];
        got.sort_unstable();
        let mut expected = ids.clone();
        expected.sort_unstable();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_timeout_keeps_connection_open() {
        let (client, mux, _sent) = client(false);

        let err = client.send(Envelope::ping(0), Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, StratusError::Timeout(_)));
        assert!(client.is_alive());
        assert_eq!(mux.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let (client, _mux, sent) = client(false);

        let c = client.clone();
        let waiter = tokio::spawn(async move { c.send(Envelope::ping(0), Duration::from_secs(5)).await });
        wait_for_sent(&sent, 1).await;

        client.close();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_connection_error());
        assert!(!client.is_alive());

        let err = client.send(Envelope::ping(0), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, StratusError::Transport(TransportError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_send_failure_releases_slot() {
        let (client, mux, _sent) = client(true);
        let err = client.send(Envelope::ping(0), Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_transport_class());
        assert_eq!(mux.pending_count(), 0);
    }
}
