//! Per-call state.

use std::collections::HashSet;
use std::fmt;

use stratus_core::{Context, Endpoint, Params, ServiceDescriptor};

/// Fault-tolerance policy of one call.
///
/// Pick by the idempotence of the target operation: failover may deliver
/// a request to a second node after the first one timed out, so it is only
/// safe when duplicate delivery is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InvokeStrategy {
    /// Retry transport-class failures on other candidates, sequentially,
    /// within the failover attempt budget.
    #[default]
    FailoverHandover,
    /// Exactly one attempt; every failure is surfaced.
    SingleAttempt,
}

/// Where a call is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    /// Picking an endpoint.
    Resolving,
    /// Obtaining a connection from the pool.
    Connecting,
    /// Request written, waiting for the correlated response.
    AwaitingResponse,
    /// The last attempt failed at the transport level.
    TransportFailed,
    /// A response was received and returned.
    Succeeded,
    /// The call ended with an error.
    Failed,
}

impl CallState {
    /// `Succeeded` and `Failed` are terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolving => "resolving",
            Self::Connecting => "connecting",
            Self::AwaitingResponse => "awaiting-response",
            Self::TransportFailed => "transport-failed",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State of one logical call, owned by that call alone.
#[derive(Debug)]
pub struct InvocationContext {
    pub(crate) ctx: Context,
    pub(crate) descriptor: ServiceDescriptor,
    args: Params,
    service_key: Option<String>,
    strategy: InvokeStrategy,
    pub(crate) tried: HashSet<Endpoint>,
    pub(crate) attempts: u32,
    state: CallState,
}

impl InvocationContext {
    /// Describe a call. The service key defaults to the descriptor's.
    #[must_use]
    pub fn new(ctx: Context, descriptor: ServiceDescriptor, args: Params, strategy: InvokeStrategy) -> Self {
        let service_key = descriptor.service_key().map(str::to_owned);
        Self {
            ctx,
            descriptor,
            args,
            service_key,
            strategy,
            tried: HashSet::new(),
            attempts: 0,
            state: CallState::Resolving,
        }
    }

    /// Override the service key.
    #[must_use]
    pub fn service_key(mut self, key: Option<String>) -> Self {
        self.service_key = key;
        self
    }

    /// The call context (deadline, metadata, trace id).
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Target descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Call arguments.
    #[must_use]
    pub fn args(&self) -> &Params {
        &self.args
    }

    /// Service key sent with the request.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.service_key.as_deref()
    }

    /// Fault-tolerance policy.
    #[must_use]
    pub fn strategy(&self) -> InvokeStrategy {
        self.strategy
    }

    /// Endpoints that failed during this call.
    #[must_use]
    pub fn tried(&self) -> &HashSet<Endpoint> {
        &self.tried
    }

    /// Attempts started so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CallState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: CallState) {
        tracing::trace!(
            call_id = self.ctx.call_id,
            descriptor = %self.descriptor,
            from = %self.state,
            to = %next,
            "call state"
        );
        self.state = next;
    }
}
