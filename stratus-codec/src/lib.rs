//! # stratus-codec
//!
//! Wire codec for Stratus envelopes.
//!
//! This crate provides:
//! - `FrameCodec` - Length-prefixed frame encoder/decoder
//! - `EnvelopeCodec` - rkyv archiving of `Envelope`s, framed or bare
//!
//! ## Frame Format
//!
//! ```text
//! +----------------+------------------+
//! | Length (4 LE)  | Payload (N bytes)|
//! +----------------+------------------+
//! ```

mod envelope;
mod frame;

pub use envelope::EnvelopeCodec;
pub use frame::{DEFAULT_MAX_FRAME_SIZE, FrameCodec};

// Re-export for convenience
pub use rkyv::util::AlignedVec;
