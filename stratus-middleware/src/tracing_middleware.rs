//! Distributed tracing interceptor.

use stratus_core::{Context, ServiceDescriptor, StratusError, TraceId};
use tracing::{Span, info_span};

use crate::interceptor::{Interceptor, InterceptorError};

/// Attachment key carrying the trace id.
pub const TRACE_ID_KEY: &str = "x-trace-id";
/// Attachment key carrying the logical call id.
pub const REQUEST_ID_KEY: &str = "x-request-id";
/// Attachment key naming the calling application.
pub const SERVICE_KEY: &str = "x-service";

/// Propagates trace identity to the remote side.
///
/// Gives every call a trace id (keeping one that is already set) and
/// stamps it, the call id and the local application name into the call
/// metadata, which travels as envelope attachments. Failed calls are
/// logged with the same identifiers.
///
/// ## Example
///
/// ```rust
/// use stratus_middleware::TracingInterceptor;
///
/// let interceptor = TracingInterceptor::new("billing-frontend");
/// ```
pub struct TracingInterceptor {
    service_name: String,
}

impl TracingInterceptor {
    /// Create a new tracing interceptor.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl Interceptor for TracingInterceptor {
    fn intercept_request(
        &self,
        ctx: &mut Context,
        _descriptor: &ServiceDescriptor,
    ) -> Result<(), InterceptorError> {
        let trace_id = ctx.trace_id.get_or_insert_with(TraceId::new).to_string();

        ctx.metadata.insert(TRACE_ID_KEY.to_string(), trace_id);
        ctx.metadata.insert(REQUEST_ID_KEY.to_string(), ctx.call_id.to_string());
        ctx.metadata.insert(SERVICE_KEY.to_string(), self.service_name.clone());
        Ok(())
    }

    fn on_error(&self, ctx: &Context, error: &StratusError) {
        tracing::warn!(
            trace_id = %trace_label(ctx),
            call_id = ctx.call_id,
            service = %self.service_name,
            error = %error,
            "call failed"
        );
    }
}

fn trace_label(ctx: &Context) -> String {
    ctx.trace_id
        .as_ref()
        .map_or_else(|| "unknown".to_string(), ToString::to_string)
}

/// Extension trait for creating spans from context.
pub trait ContextSpanExt {
    /// Create a tracing span for this context.
    fn span(&self, operation: &str) -> Span;
}

impl ContextSpanExt for Context {
    fn span(&self, operation: &str) -> Span {
        info_span!(
            "call",
            operation = operation,
            trace_id = %trace_label(self),
            call_id = self.call_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamps_attachments() {
        let interceptor = TracingInterceptor::new("frontend");
        let mut ctx = Context::new();

        interceptor
            .intercept_request(&mut ctx, &ServiceDescriptor::new("svc"))
            .unwrap();

        let trace_id = ctx.trace_id.clone().unwrap();
        assert_eq!(ctx.get_metadata(TRACE_ID_KEY), Some(trace_id.to_string().as_str()));
        assert_eq!(ctx.get_metadata(REQUEST_ID_KEY), Some(ctx.call_id.to_string().as_str()));
        assert_eq!(ctx.get_metadata(SERVICE_KEY), Some("frontend"));
    }

    #[test]
    fn test_preserves_existing_trace_id() {
        let interceptor = TracingInterceptor::new("frontend");
        let original = TraceId([7; 16]);
        let mut ctx = Context::new();
        ctx.trace_id = Some(original.clone());

        interceptor
            .intercept_request(&mut ctx, &ServiceDescriptor::new("svc"))
            .unwrap();

        assert_eq!(ctx.trace_id, Some(original));
        assert_eq!(ctx.get_metadata(TRACE_ID_KEY), Some("07".repeat(16).as_str()));
    }

    #[test]
    fn test_span_has_call_fields() {
        let ctx = Context::new().with_tracing();
        let span = ctx.span("invoke");
        // No subscriber installed: the span is disabled but must not panic.
        let _entered = span.enter();
    }
}
