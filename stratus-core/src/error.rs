//! Error types for the Stratus invocation pipeline.

use std::time::Duration;

/// Call-level error surfaced by the invocation pipeline.
///
/// Only [`StratusError::Transport`] and [`StratusError::Timeout`] are
/// eligible for failover; everything else reaches the caller untouched.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StratusError {
    /// Resolution found zero endpoints for the descriptor.
    #[error("no candidate endpoint for {0}")]
    NoCandidate(String),

    /// Transport-level failure establishing or using a connection.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No correlated response arrived before the deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The remote method ran and reported an application-level failure.
    #[error("remote error [{code}]: {message}")]
    Remote {
        /// Error code for programmatic handling
        code: u32,
        /// Human-readable error message
        message: String,
    },

    /// Malformed or undecodable bytes.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The pending slot was dropped before a response arrived.
    #[error("request cancelled")]
    Cancelled,

    /// An interceptor refused to send the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Transport-level errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// IO error from the underlying transport
    #[error("io error: {0}")]
    Io(std::sync::Arc<std::io::Error>),

    /// Connection was closed unexpectedly
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed to connect to the remote endpoint
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Codec errors for serialization and framing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    /// Frame size exceeds maximum allowed
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Invalid frame format
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization/validation failed
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(std::sync::Arc::new(e))
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            Self::Deserialization(e.to_string())
        } else {
            Self::Serialization(e.to_string())
        }
    }
}

impl StratusError {
    /// Create a remote business error with code and message.
    #[must_use]
    pub fn remote(code: u32, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// Whether this error may trigger failover to another endpoint.
    ///
    /// Connect errors and timeouts qualify. Remote business errors never do:
    /// the remote side may already have performed its side effect.
    #[must_use]
    pub fn is_transport_class(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// Check if this error indicates the connection should be dropped.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::ConnectionClosed)
                | Self::Transport(TransportError::Io(_))
                | Self::Transport(TransportError::Protocol(_))
        )
    }
}
