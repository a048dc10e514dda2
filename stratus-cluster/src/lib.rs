//! # stratus-cluster
//!
//! Turns a logical call into network attempts.
//!
//! [`ClusterInvoker`] resolves an endpoint for a descriptor, borrows the
//! pooled connection to it and waits for the correlated response. Under
//! [`InvokeStrategy::FailoverHandover`] transport failures move the call to
//! the next untried candidate; [`InvokeStrategy::SingleAttempt`] surfaces
//! the first failure.

mod call;
mod invoker;

pub use call::{CallState, InvocationContext, InvokeStrategy};
pub use invoker::{ClusterInvoker, ClusterInvokerBuilder, InvokerConfig, TOKEN_KEY};
