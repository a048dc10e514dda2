//! Call hooks and the ordered chain that runs them.

use std::sync::Arc;

use stratus_core::{Context, Envelope, ServiceDescriptor, StratusError};

/// Why an interceptor stopped a call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InterceptorError {
    /// The call is not allowed to proceed.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The interceptor itself failed.
    #[error("interceptor error: {0}")]
    Internal(String),
}

impl From<InterceptorError> for StratusError {
    fn from(err: InterceptorError) -> Self {
        match err {
            InterceptorError::Rejected(reason) => StratusError::Rejected(reason),
            InterceptorError::Internal(reason) => StratusError::Rejected(format!("interceptor failed: {reason}")),
        }
    }
}

/// Hooks around one outbound call.
///
/// `intercept_request` runs once per logical call, before the first
/// attempt; context metadata it adds travels as envelope attachments on
/// every attempt. `intercept_response` sees the response envelope of the
/// attempt that produced one. `on_error` sees the error the caller gets.
///
/// ## Example
///
/// ```rust
/// use stratus_middleware::{Interceptor, InterceptorError};
/// use stratus_core::{Context, ServiceDescriptor};
///
/// struct TenantInterceptor(&'static str);
///
/// impl Interceptor for TenantInterceptor {
///     fn intercept_request(
///         &self,
///         ctx: &mut Context,
///         descriptor: &ServiceDescriptor,
///     ) -> Result<(), InterceptorError> {
///         if descriptor.service_id().starts_with("admin.") {
///             return Err(InterceptorError::Rejected("admin services are internal".into()));
///         }
///         ctx.metadata.insert("tenant".to_string(), self.0.to_string());
///         Ok(())
///     }
/// }
/// ```
pub trait Interceptor: Send + Sync + 'static {
    /// Intercept an outgoing call. Returning an error rejects it.
    fn intercept_request(
        &self,
        ctx: &mut Context,
        descriptor: &ServiceDescriptor,
    ) -> Result<(), InterceptorError> {
        let _ = (ctx, descriptor);
        Ok(())
    }

    /// Intercept a response envelope before it is turned into an outcome.
    fn intercept_response(&self, ctx: &Context, response: &mut Envelope) -> Result<(), InterceptorError> {
        let _ = (ctx, response);
        Ok(())
    }

    /// Called when a call fails.
    fn on_error(&self, ctx: &Context, error: &StratusError) {
        let _ = (ctx, error);
    }
}

/// Interceptors in registration order.
///
/// Request hooks run first to last and stop at the first rejection;
/// response hooks run last to first; every error hook runs.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor.
    #[must_use]
    pub fn with(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Run every request hook.
    pub fn intercept_request(
        &self,
        ctx: &mut Context,
        descriptor: &ServiceDescriptor,
    ) -> Result<(), InterceptorError> {
        for interceptor in &self.interceptors {
            interceptor.intercept_request(ctx, descriptor)?;
        }
        Ok(())
    }

    /// Run every response hook, last registered first.
    pub fn intercept_response(&self, ctx: &Context, response: &mut Envelope) -> Result<(), InterceptorError> {
        for interceptor in self.interceptors.iter().rev() {
            interceptor.intercept_response(ctx, response)?;
        }
        Ok(())
    }

    pub fn on_error(&self, ctx: &Context, error: &StratusError) {
        for interceptor in &self.interceptors {
            interceptor.on_error(ctx, error);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Stamp {
        value: &'static str,
    }

    impl Interceptor for Stamp {
        fn intercept_request(
            &self,
            ctx: &mut Context,
            _descriptor: &ServiceDescriptor,
        ) -> Result<(), InterceptorError> {
            ctx.metadata.insert("stamp".to_string(), self.value.to_string());
            Ok(())
        }

        fn intercept_response(&self, _ctx: &Context, response: &mut Envelope) -> Result<(), InterceptorError> {
            response.route.push_str(self.value);
            Ok(())
        }
    }

    #[test]
    fn test_request_order_and_response_reverse_order() {
        let chain = InterceptorChain::new()
            .with(Stamp { value: "a" })
            .with(Stamp { value: "b" });
        assert_eq!(chain.len(), 2);

        let mut ctx = Context::new();
        chain.intercept_request(&mut ctx, &ServiceDescriptor::new("svc")).unwrap();
        assert_eq!(ctx.get_metadata("stamp"), Some("b"));

        let mut response = Envelope::pong(1);
        chain.intercept_response(&ctx, &mut response).unwrap();
        assert_eq!(response.route, "ba");
    }

    struct Rejecting;

    impl Interceptor for Rejecting {
        fn intercept_request(
            &self,
            _ctx: &mut Context,
            _descriptor: &ServiceDescriptor,
        ) -> Result<(), InterceptorError> {
            Err(InterceptorError::Rejected("not allowed".into()))
        }
    }

    #[derive(Default)]
    struct CountErrors(AtomicUsize);

    impl Interceptor for Arc<CountErrors> {
        fn on_error(&self, _ctx: &Context, _error: &StratusError) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_rejection_maps_to_rejected() {
        let counter = Arc::new(CountErrors::default());
        let chain = InterceptorChain::new().with(Rejecting).with(counter.clone());

        let mut ctx = Context::new();
        let err: StratusError = chain
            .intercept_request(&mut ctx, &ServiceDescriptor::new("svc"))
            .unwrap_err()
            .into();
        assert!(matches!(err, StratusError::Rejected(_)));
        assert!(!err.is_transport_class());

        chain.on_error(&ctx, &err);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
