//! Cluster-level invocation: resolve, connect, send, fail over.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Instrument;

use stratus_core::{
    Attachment, CodecError, Context, Endpoint, Envelope, Params, ServiceDescriptor, StratusError,
};
use stratus_discovery::{
    AddressResolver, AddressSelector, HealthConfig, HealthTracker, RouteProvider, SelectorKind,
};
use stratus_middleware::{ContextSpanExt, FailoverConfig, Interceptor, InterceptorChain};
use stratus_transport::{Connector, PoolConfig, TransportClientPool};

use crate::call::{CallState, InvocationContext, InvokeStrategy};

/// Attachment key carrying the endpoint's security token.
pub const TOKEN_KEY: &str = "x-endpoint-token";

/// Invoker-wide settings.
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Deadline applied to calls whose context has none.
    pub default_timeout: Duration,
    /// Upper bound on a single attempt; unbounded attempts may use the
    /// whole remaining call deadline.
    pub attempt_timeout: Option<Duration>,
    /// Attempt budget and backoff for [`InvokeStrategy::FailoverHandover`].
    pub failover: FailoverConfig,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            attempt_timeout: None,
            failover: FailoverConfig::default(),
        }
    }
}

impl InvokerConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default call timeout.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Bound each attempt separately.
    #[must_use]
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Set the failover policy.
    #[must_use]
    pub fn failover(mut self, failover: FailoverConfig) -> Self {
        self.failover = failover;
        self
    }
}

/// Executes logical calls against a cluster of endpoints.
///
/// Every call resolves an endpoint from the current route snapshot (healthy
/// candidates first), obtains the pooled connection to it, sends the
/// request and waits for the correlated response. Under
/// [`InvokeStrategy::FailoverHandover`] a connect error or timeout marks
/// the endpoint failed, excludes it for the rest of the call and tries the
/// next candidate; remote business errors are never retried.
///
/// Failed connects are reported to the health tracker by the pool, once
/// per connect attempt however many callers shared it. Failures after a
/// connection was obtained are reported here.
pub struct ClusterInvoker<P> {
    routes: P,
    resolver: AddressResolver,
    pool: TransportClientPool,
    interceptors: InterceptorChain,
    config: InvokerConfig,
}

impl<P: RouteProvider> ClusterInvoker<P> {
    /// Start building an invoker.
    pub fn builder(routes: P, connector: Arc<dyn Connector>) -> ClusterInvokerBuilder<P> {
        ClusterInvokerBuilder::new(routes, connector)
    }

    /// The health tracker shared by resolver, pool and invoker.
    #[must_use]
    pub fn health(&self) -> &Arc<HealthTracker> {
        self.resolver.health()
    }

    /// The connection pool.
    #[must_use]
    pub fn pool(&self) -> &TransportClientPool {
        &self.pool
    }

    /// The route provider.
    #[must_use]
    pub fn routes(&self) -> &P {
        &self.routes
    }

    /// The invoker configuration.
    #[must_use]
    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Invoke `descriptor` with a parameter map.
    ///
    /// `service_key` overrides the descriptor's service key when set.
    pub async fn invoke(
        &self,
        ctx: Context,
        descriptor: &ServiceDescriptor,
        args: Params,
        service_key: Option<&str>,
        strategy: InvokeStrategy,
    ) -> Result<Value, StratusError> {
        let mut call = InvocationContext::new(ctx, descriptor.clone(), args, strategy);
        if let Some(key) = service_key {
            call = call.service_key(Some(key.to_owned()));
        }
        self.execute(&mut call).await
    }

    /// Typed wrapper around [`invoke`](Self::invoke).
    ///
    /// `args` must serialize to a JSON object; its fields become the
    /// parameter map.
    pub async fn call<A, R>(
        &self,
        ctx: Context,
        descriptor: &ServiceDescriptor,
        args: &A,
        strategy: InvokeStrategy,
    ) -> Result<R, StratusError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = match serde_json::to_value(args).map_err(CodecError::from)? {
            Value::Object(params) => params,
            Value::Null => Params::new(),
            other => {
                return Err(CodecError::Serialization(format!(
                    "call arguments must be an object, got {other}"
                ))
                .into());
            }
        };

        let value = self.invoke(ctx, descriptor, params, None, strategy).await?;
        serde_json::from_value(value).map_err(|e| CodecError::from(e).into())
    }

    /// Run a prepared call to completion.
    ///
    /// On return the call is in a terminal state and records every
    /// endpoint that failed along the way.
    pub async fn execute(&self, call: &mut InvocationContext) -> Result<Value, StratusError> {
        let span = call.ctx.span(call.descriptor.service_id());
        let result = self.run(call).instrument(span).await;
        match &result {
            Ok(_) => call.transition(CallState::Succeeded),
            Err(e) => {
                call.transition(CallState::Failed);
                self.interceptors.on_error(&call.ctx, e);
            }
        }
        result
    }

    async fn run(&self, call: &mut InvocationContext) -> Result<Value, StratusError> {
        self.interceptors.intercept_request(&mut call.ctx, &call.descriptor)?;

        let started = Instant::now();
        let deadline = call.ctx.ensure_deadline(self.config.default_timeout);
        let total = deadline.saturating_duration_since(started);

        let budget = match call.strategy() {
            InvokeStrategy::FailoverHandover => self.config.failover.attempts(),
            InvokeStrategy::SingleAttempt => 1,
        };

        let request = Envelope::invoke(0, call.descriptor().service_id(), call.key().map(str::to_owned), call.args())?
            .with_attachments(call.ctx.attachments());

        let mut last_error: Option<StratusError> = None;
        loop {
            call.transition(CallState::Resolving);
            let snapshot = self.routes.get_route(call.descriptor()).await?;
            let endpoint = match self.resolver.resolve_excluding(call.descriptor(), &snapshot, &call.tried) {
                Ok(endpoint) => endpoint,
                // Candidates ran out mid-failover: report what actually went wrong.
                Err(e) => return Err(last_error.unwrap_or_else(|| e.into())),
            };

            call.attempts += 1;
            let attempt = call.attempts;
            let attempt_deadline = call
                .ctx
                .attempt_deadline(self.config.attempt_timeout)
                .unwrap_or(deadline);
            let request = with_token(&request, &endpoint);
            let error = match self.attempt(call, &endpoint, request, attempt_deadline).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport_class() => e,
                Err(e) => return Err(e),
            };

            call.transition(CallState::TransportFailed);
            call.tried.insert(endpoint.clone());

            if attempt >= budget {
                if budget > 1 {
                    tracing::warn!(
                        descriptor = %call.descriptor(),
                        endpoint = %endpoint,
                        attempts = attempt,
                        error = %error,
                        "failover attempts exhausted"
                    );
                }
                return Err(error);
            }
            if Instant::now() >= deadline {
                return Err(StratusError::Timeout(total));
            }

            tracing::debug!(
                descriptor = %call.descriptor(),
                endpoint = %endpoint,
                attempt,
                error = %error,
                "transport failure, failing over"
            );
            last_error = Some(error);

            let delay = self.config.failover.delay_for_retry(attempt - 1);
            if !delay.is_zero() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                tokio::time::sleep(delay.min(remaining)).await;
            }
        }
    }

    async fn attempt(
        &self,
        call: &mut InvocationContext,
        endpoint: &Endpoint,
        request: Envelope,
        deadline: Instant,
    ) -> Result<Value, StratusError> {
        call.transition(CallState::Connecting);
        let remaining = deadline.saturating_duration_since(Instant::now());
        let client = match tokio::time::timeout(remaining, self.pool.get(endpoint)).await {
            Ok(client) => client?,
            // The pool drives the attempt to completion and marks its failure.
            Err(_) => return Err(StratusError::Timeout(remaining)),
        };

        call.transition(CallState::AwaitingResponse);
        let remaining = deadline.saturating_duration_since(Instant::now());
        match client.send(request, remaining).await {
            Ok(mut response) => {
                self.health().mark_success(endpoint);
                self.interceptors.intercept_response(&call.ctx, &mut response)?;
                response.into_outcome()
            }
            Err(e) => {
                if e.is_transport_class() {
                    self.health().mark_failure(endpoint);
                }
                Err(e)
            }
        }
    }
}

/// The token attachment is reserved: whatever the caller put there is
/// replaced by the endpoint's own token, or dropped if it has none.
fn with_token(request: &Envelope, endpoint: &Endpoint) -> Envelope {
    let mut request = request.clone();
    request.attachments.retain(|a| a.key != TOKEN_KEY);
    if let Some(token) = endpoint.token() {
        request.attachments.push(Attachment {
            key: TOKEN_KEY.to_string(),
            value: token.to_string(),
        });
    }
    request
}

/// Builder for [`ClusterInvoker`].
pub struct ClusterInvokerBuilder<P> {
    routes: P,
    connector: Arc<dyn Connector>,
    health: Option<Arc<HealthTracker>>,
    health_config: HealthConfig,
    selector: Arc<dyn AddressSelector>,
    pool_config: PoolConfig,
    interceptors: InterceptorChain,
    config: InvokerConfig,
}

impl<P: RouteProvider> ClusterInvokerBuilder<P> {
    fn new(routes: P, connector: Arc<dyn Connector>) -> Self {
        Self {
            routes,
            connector,
            health: None,
            health_config: HealthConfig::default(),
            selector: SelectorKind::default().build(),
            pool_config: PoolConfig::default(),
            interceptors: InterceptorChain::new(),
            config: InvokerConfig::default(),
        }
    }

    /// Share an existing health tracker (e.g. one with a running prober).
    #[must_use]
    pub fn health(mut self, health: Arc<HealthTracker>) -> Self {
        self.health = Some(health);
        self
    }

    /// Configure the health tracker created by `build`.
    #[must_use]
    pub fn health_config(mut self, config: HealthConfig) -> Self {
        self.health_config = config;
        self
    }

    /// Use a built-in selection strategy.
    #[must_use]
    pub fn selector(mut self, kind: SelectorKind) -> Self {
        self.selector = kind.build();
        self
    }

    /// Use a custom selection strategy.
    #[must_use]
    pub fn custom_selector(mut self, selector: Arc<dyn AddressSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Configure the connection pool.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Append an interceptor.
    #[must_use]
    pub fn interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors = self.interceptors.with(interceptor);
        self
    }

    /// Replace the interceptor chain.
    #[must_use]
    pub fn interceptors(mut self, chain: InterceptorChain) -> Self {
        self.interceptors = chain;
        self
    }

    /// Set the invoker configuration.
    #[must_use]
    pub fn config(mut self, config: InvokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the failover policy.
    #[must_use]
    pub fn failover(mut self, failover: FailoverConfig) -> Self {
        self.config.failover = failover;
        self
    }

    /// Build the invoker.
    #[must_use]
    pub fn build(self) -> ClusterInvoker<P> {
        let health = self
            .health
            .unwrap_or_else(|| Arc::new(HealthTracker::new(self.health_config)));
        let pool = TransportClientPool::with_health_reporter(self.connector, self.pool_config, health.clone());

        ClusterInvoker {
            routes: self.routes,
            resolver: AddressResolver::new(health, self.selector),
            pool,
            interceptors: self.interceptors,
            config: self.config,
        }
    }
}
