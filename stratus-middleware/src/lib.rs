//! # stratus-middleware
//!
//! Call policy for the Stratus framework.
//!
//! This crate provides:
//! - `Interceptor` trait for request/response interception
//! - `TimeoutInterceptor` for supplying call deadlines
//! - `TracingInterceptor` for trace propagation and failure logging
//! - `FailoverConfig` for the failover attempt budget and backoff

mod failover;
mod interceptor;
mod timeout;
mod tracing_middleware;

pub use failover::FailoverConfig;
pub use interceptor::{Interceptor, InterceptorChain, InterceptorError};
pub use timeout::TimeoutInterceptor;
pub use tracing_middleware::{
    ContextSpanExt, REQUEST_ID_KEY, SERVICE_KEY, TRACE_ID_KEY, TracingInterceptor,
};
