//! # stratus-discovery
//!
//! Address resolution for the Stratus framework.
//!
//! This crate provides:
//! - `RouteSnapshot` / `RouteProvider` - immutable descriptor → endpoint tables
//! - `HealthTracker` - per-endpoint health with a background prober
//! - `PollingSelector` / `RandomSelector` - selection strategies
//! - `AddressResolver` - health-aware resolution with unfiltered fallback

mod health;
mod resolver;
mod route;
mod selector;

pub use health::{HealthConfig, HealthSnapshot, HealthStatus, HealthTracker, ProberHandle};
pub use resolver::AddressResolver;
pub use route::{
    ResolveError, RouteProvider, RouteSnapshot, RouteSnapshotBuilder, StaticRouteProvider,
};
pub use selector::{AddressSelector, PollingSelector, RandomSelector, SelectorKind};
