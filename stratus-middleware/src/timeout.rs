//! Call deadlines per service.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use stratus_core::{Context, ServiceDescriptor};

use crate::interceptor::{Interceptor, InterceptorError};

/// Supplies the call deadline.
///
/// A call without a deadline gets `now + timeout`, where the timeout is the
/// one configured for the descriptor's service id or the default. An
/// existing deadline is kept unless it lies beyond the optional ceiling.
/// The deadline bounds the whole call, failover attempts included.
///
/// ```rust
/// use std::time::Duration;
/// use stratus_middleware::TimeoutInterceptor;
///
/// let interceptor = TimeoutInterceptor::new(Duration::from_secs(30))
///     .for_service("reports.render", Duration::from_secs(120))
///     .with_max(Duration::from_secs(300));
/// ```
#[derive(Debug, Clone)]
pub struct TimeoutInterceptor {
    default_timeout: Duration,
    per_service: HashMap<String, Duration>,
    max_timeout: Option<Duration>,
}

impl TimeoutInterceptor {
    /// Create an interceptor applying `default_timeout` to every service.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            per_service: HashMap::new(),
            max_timeout: None,
        }
    }

    /// Use `timeout` instead of the default for one service id.
    #[must_use]
    pub fn for_service(mut self, service_id: impl Into<String>, timeout: Duration) -> Self {
        self.per_service.insert(service_id.into(), timeout);
        self
    }

    /// Cap every deadline, caller-supplied ones included, at `now + max`.
    #[must_use]
    pub fn with_max(mut self, max_timeout: Duration) -> Self {
        self.max_timeout = Some(max_timeout);
        self
    }

    /// The timeout applied to calls on `descriptor` that carry no deadline.
    #[must_use]
    pub fn timeout_for(&self, descriptor: &ServiceDescriptor) -> Duration {
        self.per_service
            .get(descriptor.service_id())
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// The timeout for services without their own.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

impl Interceptor for TimeoutInterceptor {
    fn intercept_request(
        &self,
        ctx: &mut Context,
        descriptor: &ServiceDescriptor,
    ) -> Result<(), InterceptorError> {
        let now = Instant::now();
        let mut deadline = ctx
            .deadline
            .unwrap_or_else(|| now + self.timeout_for(descriptor));
        if let Some(max) = self.max_timeout {
            deadline = deadline.min(now + max);
        }
        ctx.deadline = Some(deadline);

        if ctx.is_expired() {
            tracing::debug!(service = %descriptor, "deadline passed before the call started");
            return Err(InterceptorError::Rejected(format!(
                "deadline for {descriptor} already passed"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remaining_after(interceptor: &TimeoutInterceptor, descriptor: &ServiceDescriptor) -> Duration {
        let mut ctx = Context::new();
        interceptor.intercept_request(&mut ctx, descriptor).unwrap();
        ctx.remaining().unwrap()
    }

    #[test]
    fn test_service_override_beats_default() {
        let interceptor = TimeoutInterceptor::new(Duration::from_secs(2))
            .for_service("reports.render", Duration::from_secs(60));

        let slow = ServiceDescriptor::new("reports.render");
        let fast = ServiceDescriptor::new("users.get");
        assert_eq!(interceptor.timeout_for(&slow), Duration::from_secs(60));
        assert_eq!(interceptor.timeout_for(&fast), Duration::from_secs(2));

        assert!(remaining_after(&interceptor, &slow) > Duration::from_secs(30));
        assert!(remaining_after(&interceptor, &fast) <= Duration::from_secs(2));
    }

    #[test]
    fn test_caller_deadline_is_kept() {
        let interceptor = TimeoutInterceptor::new(Duration::from_secs(30));
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut ctx = Context::new().deadline(deadline);

        interceptor
            .intercept_request(&mut ctx, &ServiceDescriptor::new("svc"))
            .unwrap();

        assert_eq!(ctx.deadline, Some(deadline));
    }

    #[test]
    fn test_ceiling_applies_to_overrides_and_callers() {
        let interceptor = TimeoutInterceptor::new(Duration::from_secs(30))
            .for_service("batch", Duration::from_secs(600))
            .with_max(Duration::from_secs(5));

        assert!(remaining_after(&interceptor, &ServiceDescriptor::new("batch")) <= Duration::from_secs(5));

        let mut ctx = Context::new().deadline(Instant::now() + Duration::from_secs(100));
        interceptor
            .intercept_request(&mut ctx, &ServiceDescriptor::new("svc"))
            .unwrap();
        assert!(ctx.remaining().unwrap() <= Duration::from_secs(5));
    }

    #[test]
    fn test_expired_deadline_is_rejected() {
        let interceptor = TimeoutInterceptor::new(Duration::from_secs(30));
        let mut ctx = Context::new();
        ctx.deadline = Some(Instant::now() - Duration::from_secs(1));

        let err = interceptor
            .intercept_request(&mut ctx, &ServiceDescriptor::new("svc"))
            .unwrap_err();
        assert!(matches!(err, InterceptorError::Rejected(_)));
    }
}
