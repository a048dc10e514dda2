//! # stratus-transport
//!
//! Connection management for the Stratus framework.
//!
//! This crate provides:
//! - `Multiplexer` - request/response correlation on one connection
//! - `TransportClient` - one live, multiplexed connection
//! - `TransportClientPool` - per-endpoint cache with single-flight connect
//! - `Connector` - connection factory seam, implemented by `TcpConnector`
//!   and the in-process `LocalConnector`
//! - `TcpListener` / `TcpProbe` - the TCP accept side and liveness probe
//!
//! ## Architecture Note
//!
//! Connections are `Send + Sync` and shared by every caller targeting the
//! same endpoint. Each TCP connection owns one reader task; writes are
//! serialized through an async mutex around the write half.

mod client;
mod local;
mod mux;
mod pool;
mod tcp;

pub use client::{ConnectFuture, Connector, TransportClient};
pub use local::LocalConnector;
pub use mux::{Multiplexer, PendingResponse};
pub use pool::{PoolConfig, PoolStats, TransportClientPool};
pub use tcp::{TcpClientConfig, TcpConnector, TcpListener, TcpProbe, TcpServerConfig};
