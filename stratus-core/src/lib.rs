//! # stratus-core
//!
//! Core types, traits, and error definitions for the Stratus framework.
//!
//! This crate provides:
//! - Error types (`StratusError`, `TransportError`, `CodecError`)
//! - Service identity (`ServiceDescriptor`, `Endpoint`)
//! - Call context (`Context`)
//! - The protocol-agnostic `Envelope`
//! - Collaborator traits (`Codec`, `MessageSender`, `MessageHandler`,
//!   `Listener`, `HealthReporter`, `HealthProbe`)

mod context;
mod error;
mod message;
mod service;
mod transport;

pub use context::{Context, Metadata, TraceId};
pub use error::{CodecError, StratusError, TransportError};
pub use message::{
    ArchivedEnvelope, ArchivedEnvelopeKind, Attachment, Envelope, EnvelopeKind, Params,
    RemoteFault,
};
pub use service::{DescriptorBuilder, Endpoint, ServiceDescriptor};
pub use transport::{
    BoxFuture, Codec, HealthProbe, HealthReporter, Listener, MessageHandler, MessageSender,
};
