//! Collaborator trait definitions.
//!
//! The invocation core only ever talks to the outside world through these
//! traits: codecs turn envelopes into bytes, senders write envelopes to a
//! channel, handlers react to received envelopes, and listeners own the
//! accept side of a wire protocol.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use crate::error::{CodecError, TransportError};
use crate::message::Envelope;
use crate::service::Endpoint;

/// Boxed, sendable future used at object-safe trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Converts envelopes to and from one wire protocol's bytes.
pub trait Codec: Send + Sync + 'static {
    /// Encode an envelope.
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError>;

    /// Decode an envelope.
    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError>;
}

/// Write side of a channel.
pub trait MessageSender: Send + Sync {
    /// Send an envelope, keeping the channel open.
    fn send(&self, envelope: Envelope) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Send an envelope, then close the channel.
    fn send_and_close(&self, envelope: Envelope) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Reacts to a received envelope and produces the reply envelope.
///
/// Implementations must not panic across this boundary and must turn
/// every failure into a fault envelope.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one received envelope.
    fn handle(&self, envelope: Envelope) -> BoxFuture<'_, Envelope>;
}

/// Accept side of a wire protocol.
pub trait Listener: Send + Sync {
    /// Start accepting on the endpoint. Returns the bound address, which
    /// differs from the requested one when port 0 was asked for.
    fn start(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<SocketAddr, TransportError>> + Send;

    /// Stop accepting and close open channels.
    fn stop(&self) -> impl Future<Output = ()> + Send;
}

/// Sink for per-endpoint health signals.
pub trait HealthReporter: Send + Sync {
    /// Record a transport failure against the endpoint.
    fn mark_failure(&self, endpoint: &Endpoint);

    /// Record a success against the endpoint.
    fn mark_success(&self, endpoint: &Endpoint);
}

/// Lightweight liveness check used by background probing.
pub trait HealthProbe: Send + Sync + 'static {
    /// Returns `true` if the endpoint accepted a connection.
    fn probe(&self, endpoint: &Endpoint) -> BoxFuture<'_, bool>;
}
