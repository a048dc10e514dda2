//! Per-endpoint connection cache with single-flight connection setup.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{Either, Shared, select};
use futures_timer::Delay;

use stratus_core::{Endpoint, HealthReporter, TransportError};

use crate::client::{ConnectFuture, Connector, TransportClient};

/// Configuration for connection pooling.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on one connection attempt.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

type SharedConnect = Shared<ConnectFuture>;

enum Slot {
    Connecting { attempt: u64, future: SharedConnect },
    Ready(Arc<TransportClient>),
}

enum Reuse {
    Ready(Arc<TransportClient>),
    Join(SharedConnect),
}

impl Slot {
    fn reuse(&self) -> Option<Reuse> {
        match self {
            Self::Ready(client) if client.is_alive() => Some(Reuse::Ready(client.clone())),
            Self::Connecting { future, .. } => Some(Reuse::Join(future.clone())),
            Self::Ready(_) => None,
        }
    }
}

struct PoolInner {
    slots: DashMap<Endpoint, Slot>,
    connector: Arc<dyn Connector>,
    health: Option<Arc<dyn HealthReporter>>,
    config: PoolConfig,
    next_attempt: AtomicU64,
    connects: AtomicU64,
    closed: AtomicBool,
}

impl PoolInner {
    fn start_connect(self: &Arc<Self>, endpoint: &Endpoint) -> (Slot, SharedConnect) {
        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        let connector = self.connector.clone();
        let timeout = self.config.connect_timeout;
        let weak: Weak<Self> = Arc::downgrade(self);
        let endpoint = endpoint.clone();

        let future: ConnectFuture = Box::pin(async move {
            let connect = pin!(connector.connect(&endpoint));
            let deadline = pin!(Delay::new(timeout));
            let result = match select(connect, deadline).await {
                Either::Left((result, _)) => result,
                Either::Right(_) => Err(TransportError::ConnectionFailed(format!(
                    "connect to {endpoint} timed out after {timeout:?}"
                ))),
            };
            if let Some(inner) = weak.upgrade() {
                inner.settle(&endpoint, attempt, &result);
            }
            result
        });

        let shared = future.shared();
        // Waiters may give up early; the attempt still has to settle.
        tokio::spawn(shared.clone());
        (
            Slot::Connecting {
                attempt,
                future: shared.clone(),
            },
            shared,
        )
    }

    /// Record the outcome of a connection attempt. Runs exactly once per
    /// attempt, inside the shared future, which a spawned task drives to
    /// completion whether or not anyone still awaits it.
    fn settle(&self, endpoint: &Endpoint, attempt: u64, result: &Result<Arc<TransportClient>, TransportError>) {
        let is_current = |slot: &Slot| matches!(slot, Slot::Connecting { attempt: a, .. } if *a == attempt);

        match result {
            Ok(client) => {
                self.connects.fetch_add(1, Ordering::Relaxed);
                if let Some(mut slot) = self.slots.get_mut(endpoint) {
                    if is_current(slot.value()) {
                        *slot = Slot::Ready(client.clone());
                    }
                }
                if self.closed.load(Ordering::Acquire) {
                    client.close();
                }
                tracing::debug!(endpoint = %endpoint, "connection established");
            }
            Err(e) => {
                self.slots.remove_if(endpoint, |_, slot| is_current(slot));
                tracing::warn!(endpoint = %endpoint, error = %e, "connection attempt failed");
                if let Some(health) = &self.health {
                    health.mark_failure(endpoint);
                }
            }
        }
    }
}

/// Cache of live [`TransportClient`]s, at most one per endpoint.
///
/// Concurrent callers asking for the same endpoint while no connection
/// exists share one connection attempt: the first caller installs a
/// pending slot and every later caller awaits the same shared future.
/// No lock is held while connecting. A failed attempt removes its slot
/// and reports the endpoint to the health sink, so the next request
/// starts a fresh attempt. A cached connection found closed is replaced
/// on the next request.
///
/// ## Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use stratus_core::Endpoint;
/// use stratus_transport::{PoolConfig, TcpConnector, TransportClientPool};
///
/// # async fn demo() -> Result<(), stratus_core::TransportError> {
/// let pool = TransportClientPool::new(Arc::new(TcpConnector::new()), PoolConfig::default());
/// let client = pool.get(&Endpoint::new("127.0.0.1", 9000)).await?;
/// assert!(client.is_alive());
/// # Ok(())
/// # }
/// ```
pub struct TransportClientPool {
    inner: Arc<PoolInner>,
}

impl TransportClientPool {
    /// Create a pool over a connector.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self::build(connector, config, None)
    }

    /// Create a pool that reports failed connects to `health`.
    #[must_use]
    pub fn with_health_reporter(
        connector: Arc<dyn Connector>,
        config: PoolConfig,
        health: Arc<dyn HealthReporter>,
    ) -> Self {
        Self::build(connector, config, Some(health))
    }

    fn build(connector: Arc<dyn Connector>, config: PoolConfig, health: Option<Arc<dyn HealthReporter>>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                slots: DashMap::new(),
                connector,
                health,
                config,
                next_attempt: AtomicU64::new(0),
                connects: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Get the live connection to `endpoint`, connecting if needed.
    pub async fn get(&self, endpoint: &Endpoint) -> Result<Arc<TransportClient>, TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }

        let reuse = self.inner.slots.get(endpoint).and_then(|slot| slot.reuse());
        let future = match reuse {
            Some(Reuse::Ready(client)) => return Ok(client),
            Some(Reuse::Join(future)) => future,
            None => match self.inner.slots.entry(endpoint.clone()) {
                Entry::Occupied(mut occupied) => match occupied.get().reuse() {
                    Some(Reuse::Ready(client)) => return Ok(client),
                    Some(Reuse::Join(future)) => future,
                    None => {
                        tracing::debug!(endpoint = %endpoint, "replacing closed connection");
                        let (slot, future) = self.inner.start_connect(endpoint);
                        occupied.insert(slot);
                        future
                    }
                },
                Entry::Vacant(vacant) => {
                    let (slot, future) = self.inner.start_connect(endpoint);
                    vacant.insert(slot);
                    future
                }
            },
        };

        future.await
    }

    /// Drop the cached connection to `endpoint`, closing it if it was live.
    pub fn evict(&self, endpoint: &Endpoint) -> bool {
        match self.inner.slots.remove(endpoint) {
            Some((_, Slot::Ready(client))) => {
                client.close();
                true
            }
            Some((_, Slot::Connecting { .. })) => true,
            None => false,
        }
    }

    /// Number of cached slots, live or connecting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    /// Whether the pool caches nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Snapshot of the pool's contents.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            connects: self.inner.connects.load(Ordering::Relaxed),
            ..PoolStats::default()
        };
        for slot in &self.inner.slots {
            match slot.value() {
                Slot::Ready(c) if c.is_alive() => stats.ready += 1,
                Slot::Ready(_) => stats.closed += 1,
                Slot::Connecting { .. } => stats.connecting += 1,
            }
        }
        stats
    }

    /// Close every cached connection and refuse further requests.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        for slot in &self.inner.slots {
            if let Slot::Ready(client) = slot.value() {
                client.close();
            }
        }
        self.inner.slots.clear();
    }
}

impl Clone for TransportClientPool {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Counts of cached connections by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live connections.
    pub ready: usize,
    /// Attempts in flight.
    pub connecting: usize,
    /// Cached connections found closed, awaiting replacement.
    pub closed: usize,
    /// Successful connects since the pool was created.
    pub connects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;
    use stratus_core::{BoxFuture, Envelope, MessageSender};
    use tokio::sync::Notify;

    use crate::mux::Multiplexer;

    struct NullSender;

    impl MessageSender for NullSender {
        fn send(&self, _envelope: Envelope) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }

        fn send_and_close(&self, _envelope: Envelope) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }
    }

    /// Counts connects; holds each one until released, fails while `fail` is set.
    #[derive(Default)]
    struct GatedConnector {
        calls: AtomicUsize,
        gate: Arc<Notify>,
        hold: AtomicBool,
        fail: AtomicBool,
    }

    impl Connector for GatedConnector {
        fn connect(&self, endpoint: &Endpoint) -> ConnectFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let endpoint = endpoint.clone();
            let gate = self.gate.clone();
            let hold = self.hold.load(Ordering::SeqCst);
            let fail = self.fail.load(Ordering::SeqCst);
            Box::pin(async move {
                if hold {
                    gate.notified().await;
                }
                if fail {
                    return Err(TransportError::ConnectionFailed("refused".into()));
                }
                let client = TransportClient::new(endpoint, Arc::new(Multiplexer::new()), Arc::new(NullSender));
                Ok(Arc::new(client))
            })
        }
    }

    #[derive(Default)]
    struct RecordingHealth {
        failures: Mutex<Vec<Endpoint>>,
    }

    impl HealthReporter for RecordingHealth {
        fn mark_failure(&self, endpoint: &Endpoint) {
            self.failures.lock().push(endpoint.clone());
        }

        fn mark_success(&self, _endpoint: &Endpoint) {}
    }

    fn ep() -> Endpoint {
        Endpoint::new("10.0.0.1", 9000)
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_connect() {
        let connector = Arc::new(GatedConnector::default());
        connector.hold.store(true, Ordering::SeqCst);
        let pool = TransportClientPool::new(connector.clone(), PoolConfig::default());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.get(&ep()).await })
            })
            .collect();

        while pool.stats().connecting == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        connector.gate.notify_one();

        let clients: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
        assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
        assert_eq!(pool.stats().ready, 1);
        assert_eq!(pool.stats().connects, 1);
    }

    #[tokio::test]
    async fn test_failed_connect_evicts_and_reports() {
        let connector = Arc::new(GatedConnector::default());
        connector.fail.store(true, Ordering::SeqCst);
        let health = Arc::new(RecordingHealth::default());
        let pool = TransportClientPool::with_health_reporter(connector.clone(), PoolConfig::default(), health.clone());

        assert!(pool.get(&ep()).await.is_err());
        assert_eq!(pool.stats(), PoolStats::default());
        assert_eq!(health.failures.lock().as_slice(), &[ep()]);

        connector.fail.store(false, Ordering::SeqCst);
        assert!(pool.get(&ep()).await.is_ok());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_closed_connection_is_replaced() {
        let connector = Arc::new(GatedConnector::default());
        let pool = TransportClientPool::new(connector.clone(), PoolConfig::default());

        let first = pool.get(&ep()).await.unwrap();
        let again = pool.get(&ep()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        first.close();
        assert_eq!(pool.stats().closed, 1);

        let replaced = pool.get(&ep()).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &replaced));
        assert!(replaced.is_alive());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let connector = Arc::new(GatedConnector::default());
        connector.hold.store(true, Ordering::SeqCst);
        let health = Arc::new(RecordingHealth::default());
        let config = PoolConfig::new().connect_timeout(Duration::from_millis(20));
        let pool = TransportClientPool::with_health_reporter(connector, config, health.clone());

        let err = pool.get(&ep()).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
        assert_eq!(health.failures.lock().len(), 1);
        assert_eq!(pool.stats().connecting, 0);
    }

    #[tokio::test]
    async fn test_abandoned_connect_still_settles() {
        let connector = Arc::new(GatedConnector::default());
        connector.hold.store(true, Ordering::SeqCst);
        let health = Arc::new(RecordingHealth::default());
        let config = PoolConfig::new().connect_timeout(Duration::from_millis(50));
        let pool = TransportClientPool::with_health_reporter(connector.clone(), config, health.clone());

        let waited = tokio::time::timeout(Duration::from_millis(10), pool.get(&ep())).await;
        assert!(waited.is_err());
        assert_eq!(pool.stats().connecting, 1);

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(health.failures.lock().as_slice(), &[ep()]);
        assert_eq!(pool.stats(), PoolStats::default());

        connector.hold.store(false, Ordering::SeqCst);
        assert!(pool.get(&ep()).await.is_ok());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_evict_and_close() {
        let pool = TransportClientPool::new(Arc::new(GatedConnector::default()), PoolConfig::default());
        let client = pool.get(&ep()).await.unwrap();

        assert!(pool.evict(&ep()));
        assert!(!client.is_alive());
        assert!(!pool.evict(&ep()));

        pool.get(&ep()).await.unwrap();
        pool.close();
        assert!(matches!(pool.get(&ep()).await, Err(TransportError::ConnectionClosed)));
    }
}
