//! Request/response correlation for one connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Notify, oneshot};

use stratus_core::{Envelope, StratusError, TransportError};

type Slot = oneshot::Sender<Result<Envelope, StratusError>>;

/// Receiver side of a pending slot.
pub type PendingResponse = oneshot::Receiver<Result<Envelope, StratusError>>;

/// Outstanding-request table of a connection.
///
/// Each outbound request takes a fresh correlation id; the receive path
/// completes the matching slot. Responses may arrive in any order.
///
/// ## Example
///
/// ```rust
/// use stratus_transport::Multiplexer;
/// use stratus_core::Envelope;
///
/// let mux = Multiplexer::new();
/// let (id, mut rx) = mux.register();
///
/// assert!(mux.dispatch(Envelope::pong(id)));
/// assert!(rx.try_recv().unwrap().is_ok());
/// ```
pub struct Multiplexer {
    pending: DashMap<u64, Slot>,
    next_id: AtomicU64,
    closed: AtomicBool,
    on_close: Notify,
}

impl Multiplexer {
    /// Create a new multiplexer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            on_close: Notify::new(),
        }
    }

    /// Register a new pending request.
    ///
    /// On a closed multiplexer the receiver completes immediately with
    /// `ConnectionClosed`.
    pub fn register(&self) -> (u64, PendingResponse) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        // A concurrent close may have drained the table before our insert.
        if self.closed.load(Ordering::Acquire) {
            self.dispatch_error(id, TransportError::ConnectionClosed.into());
        }

        (id, rx)
    }

    /// Complete the slot named by the envelope's correlation id.
    ///
    /// Returns `false` if no such slot exists, e.g. because it timed out.
    pub fn dispatch(&self, response: Envelope) -> bool {
        let id = response.correlation_id;
        if let Some((_, slot)) = self.pending.remove(&id) {
            // The receiver may already be gone; nothing to do then.
            let _ = slot.send(Ok(response));
            true
        } else {
            tracing::debug!(correlation_id = id, "no pending request for response");
            false
        }
    }

    /// Complete a slot with an error.
    pub fn dispatch_error(&self, correlation_id: u64, error: StratusError) -> bool {
        if let Some((_, slot)) = self.pending.remove(&correlation_id) {
            let _ = slot.send(Err(error));
            true
        } else {
            false
        }
    }

    /// Drop a slot without completing it (deadline expiry, caller gone).
    pub fn remove(&self, correlation_id: u64) -> bool {
        self.pending.remove(&correlation_id).is_some()
    }

    /// Cancel a pending request.
    pub fn cancel(&self, correlation_id: u64) {
        self.dispatch_error(correlation_id, StratusError::Cancelled);
    }

    /// Mark the connection closed and fail every pending slot.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let keys: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        for id in keys {
            self.dispatch_error(id, TransportError::ConnectionClosed.into());
        }
        self.on_close.notify_waiters();
    }

    /// Resolves once the multiplexer is closed.
    pub async fn closed(&self) {
        let notified = self.on_close.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get the number of pending requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if there are any pending requests.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}
