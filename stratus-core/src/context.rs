//! Per-call context: deadline, trace identity and attachments.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// 128-bit trace identifier, rendered as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(pub [u8; 16]);

impl TraceId {
    /// A fresh random trace id.
    #[must_use]
    pub fn new() -> Self {
        Self(rand::random())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|byte| write!(f, "{byte:02x}"))
    }
}

/// Key-value pairs sent as envelope attachments.
pub type Metadata = HashMap<String, String>;

/// Context of one logical call.
///
/// The call id identifies the logical invocation across failover attempts;
/// each attempt gets its own wire correlation id from the connection it
/// travels on.
#[derive(Debug, Clone)]
pub struct Context {
    /// Identifier of the logical call.
    pub call_id: u64,
    /// Absolute deadline for the whole call, failover included.
    pub deadline: Option<Instant>,
    /// Sent to the provider as attachments.
    pub metadata: Metadata,
    /// Trace the call belongs to.
    pub trace_id: Option<TraceId>,
}

impl Context {
    /// A context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            call_id: NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed),
            deadline: None,
            metadata: Metadata::new(),
            trace_id: None,
        }
    }

    /// A context whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().timeout(timeout)
    }

    /// A context with an absolute deadline.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::new().deadline(deadline)
    }

    /// Set an absolute deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the deadline to `timeout` from now.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Add an attachment.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Start a new trace for this call.
    #[must_use]
    pub fn with_tracing(mut self) -> Self {
        self.trace_id = Some(TraceId::new());
        self
    }

    /// The call deadline, set to `now + default` first if there is none.
    pub fn ensure_deadline(&mut self, default: Duration) -> Instant {
        *self.deadline.get_or_insert_with(|| Instant::now() + default)
    }

    /// Deadline of one attempt: the call deadline, pulled in to
    /// `now + cap` when a cap is given. `None` without a call deadline.
    #[must_use]
    pub fn attempt_deadline(&self, cap: Option<Duration>) -> Option<Instant> {
        let deadline = self.deadline?;
        Some(cap.map_or(deadline, |cap| deadline.min(Instant::now() + cap)))
    }

    /// Time left before the deadline; `None` without a deadline or once
    /// it has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline?.checked_duration_since(Instant::now())
    }

    /// Whether the deadline has passed. Never true without a deadline.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Look up one attachment value.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Metadata as envelope attachment pairs.
    pub fn attachments(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metadata.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_ids_are_unique() {
        let (a, b) = (Context::new(), Context::new());
        assert_ne!(a.call_id, b.call_id);
        assert!(a.deadline.is_none());
    }

    #[test]
    fn test_expired_context_has_no_remaining_time() {
        let ctx = Context::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), None);

        let ctx = Context::with_timeout(Duration::from_secs(10));
        assert!(!ctx.is_expired());
        assert!(ctx.remaining().is_some());
    }

    #[test]
    fn test_ensure_deadline_keeps_existing() {
        let fixed = Instant::now() + Duration::from_secs(3);
        let mut ctx = Context::with_deadline(fixed);
        assert_eq!(ctx.ensure_deadline(Duration::from_secs(60)), fixed);

        let mut ctx = Context::new();
        let set = ctx.ensure_deadline(Duration::from_secs(60));
        assert_eq!(ctx.deadline, Some(set));
    }

    #[test]
    fn test_attempt_deadline_never_exceeds_call_deadline() {
        let call = Instant::now() + Duration::from_secs(1);
        let ctx = Context::with_deadline(call);

        assert_eq!(ctx.attempt_deadline(None), Some(call));
        assert_eq!(ctx.attempt_deadline(Some(Duration::from_secs(30))), Some(call));
        assert!(ctx.attempt_deadline(Some(Duration::from_millis(10))).unwrap() < call);
        assert_eq!(Context::new().attempt_deadline(None), None);
    }

    #[test]
    fn test_metadata_and_trace_id() {
        let ctx = Context::new().with_tracing().with_metadata("tenant", "a");
        assert_eq!(ctx.get_metadata("tenant"), Some("a"));
        assert_eq!(ctx.attachments().count(), 1);
        assert_eq!(TraceId([0xab; 16]).to_string(), "ab".repeat(16));
        assert_ne!(ctx.trace_id, Some(TraceId([0; 16])));
    }
}
