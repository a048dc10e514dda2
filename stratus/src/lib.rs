//! # Stratus
//!
//! Resilient service invocation for clusters of interchangeable nodes.
//!
//! Stratus provides:
//! - **Address resolution** over published route snapshots, preferring
//!   healthy endpoints and never failing just because every node looks dead
//! - **Health tracking** with consecutive-failure thresholds and background
//!   probing of dead endpoints
//! - **Failover**: transport failures move a call to the next untried node,
//!   sequentially and within a deadline; business errors are never retried
//! - **Pooled, multiplexed connections** with a single connect per endpoint
//!   however many callers arrive at once
//! - **Server-side dispatch** of RPC, HTTP, DNS and raw messages to typed
//!   async methods
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use stratus::prelude::*;
//!
//! let routes = StaticRouteProvider::new();
//! routes.set_route(
//!     ServiceDescriptor::new("orders.place"),
//!     [Endpoint::new("10.0.0.1", 9000), Endpoint::new("10.0.0.2", 9000)],
//! );
//!
//! let invoker = ClusterInvoker::builder(routes, Arc::new(TcpConnector::new()))
//!     .selector(SelectorKind::Polling)
//!     .build();
//!
//! let ctx = Context::with_timeout(Duration::from_secs(2));
//! assert!(ctx.deadline.is_some());
//! assert_eq!(invoker.pool().len(), 0);
//! ```
//!
//! ## Architecture
//!
//! Stratus is composed of several crates:
//!
//! - [`stratus-core`] - Envelope, context, errors and collaborator traits
//! - [`stratus-codec`] - Length-prefixed rkyv framing
//! - [`stratus-discovery`] - Route snapshots, health tracking, selection
//! - [`stratus-transport`] - Multiplexed clients, the pool, TCP and in-process transports
//! - [`stratus-middleware`] - Interceptors and failover policy
//! - [`stratus-cluster`] - The cluster invoker
//! - [`stratus-server`] - Service registry and dispatcher

// Re-export core types
pub use stratus_core::{
    Attachment, CodecError, Context, Endpoint, Envelope, EnvelopeKind, HealthProbe,
    HealthReporter, Listener, MessageHandler, MessageSender, Metadata, Params, RemoteFault,
    ServiceDescriptor, StratusError, TraceId, TransportError,
};

// Re-export codec
pub use stratus_codec::{DEFAULT_MAX_FRAME_SIZE, EnvelopeCodec, FrameCodec};

// Re-export discovery
pub use stratus_discovery::{
    AddressResolver, AddressSelector, HealthConfig, HealthSnapshot, HealthStatus, HealthTracker,
    PollingSelector, ProberHandle, RandomSelector, ResolveError, RouteProvider, RouteSnapshot,
    SelectorKind, StaticRouteProvider,
};

// Re-export transport
pub use stratus_transport::{
    Connector, LocalConnector, Multiplexer, PoolConfig, PoolStats, TcpClientConfig, TcpConnector,
    TcpListener, TcpProbe, TcpServerConfig, TransportClient, TransportClientPool,
};

// Re-export middleware
pub use stratus_middleware::{
    FailoverConfig, Interceptor, InterceptorChain, InterceptorError, TimeoutInterceptor,
    TracingInterceptor,
};

// Re-export cluster invocation
pub use stratus_cluster::{
    CallState, ClusterInvoker, ClusterInvokerBuilder, InvocationContext, InvokeStrategy,
    InvokerConfig,
};

// Re-export server side
pub use stratus_server::{
    DnsQuery, HttpRequest, Inbound, InboundMessage, RawMessage, ServiceDispatcher, ServiceEntry,
    ServiceRegistry,
};

/// Prelude module for convenient imports.
///
/// ```rust
/// use stratus::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ClusterInvoker, Context, Endpoint, InvokeStrategy, Listener, SelectorKind,
        ServiceDescriptor, ServiceDispatcher, ServiceRegistry, StaticRouteProvider, StratusError,
        TcpConnector, TcpListener,
    };
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
