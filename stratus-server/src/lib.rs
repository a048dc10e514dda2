//! # stratus-server
//!
//! Server side of a Stratus call.
//!
//! Services register typed async closures in a [`ServiceRegistry`] at
//! startup. The [`ServiceDispatcher`] maps each inbound message to its
//! entry by route key, coerces the parameter map into the closure's
//! argument type, runs it and turns the outcome (panics included) into a
//! result or fault envelope.
//!
//! ## Example
//!
//! ```rust
//! use serde::Deserialize;
//! use stratus_core::StratusError;
//! use stratus_server::{ServiceDispatcher, ServiceRegistry};
//!
//! #[derive(Deserialize)]
//! struct Add {
//!     a: i64,
//!     b: i64,
//! }
//!
//! let registry = ServiceRegistry::builder()
//!     .register("math.add", |args: Add| async move { Ok::<_, StratusError>(args.a + args.b) })
//!     .build();
//! let dispatcher = ServiceDispatcher::new(registry);
//! assert_eq!(dispatcher.registry().len(), 1);
//! ```

mod dispatcher;
mod inbound;
mod registry;

pub use dispatcher::ServiceDispatcher;
pub use inbound::{DnsQuery, HttpRequest, Inbound, InboundMessage, RawMessage};
pub use registry::{ServiceEntry, ServiceRegistry, ServiceRegistryBuilder, normalize_route};
