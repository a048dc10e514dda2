//! rkyv codec for [`Envelope`]s, with and without framing.

use ntex_bytes::BytesMut;
use ntex_codec::Decoder;
use rkyv::util::AlignedVec;

use stratus_core::{Codec, CodecError, Envelope};

use crate::frame::FrameCodec;

/// Encodes envelopes as archived rkyv buffers inside length-prefixed frames.
///
/// The [`Codec`] impl works on bare archived bytes; `encode_frame` and
/// `decode_frame` add the stream framing used by the TCP transport.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec {
    frame: FrameCodec,
}

impl EnvelopeCodec {
    /// Create a codec with the default frame limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom frame limit.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            frame: FrameCodec::with_max_frame_size(max_frame_size),
        }
    }

    /// Append one framed envelope to `dst`.
    pub fn encode_frame(&self, envelope: &Envelope, dst: &mut BytesMut) -> Result<(), CodecError> {
        let bytes = archive(envelope)?;
        self.frame.encode_slice(&bytes, dst)
    }

    /// Take one framed envelope off the front of `src`, if complete.
    pub fn decode_frame(&self, src: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
        match self.frame.decode(src)? {
            Some(frame) => unarchive(&frame).map(Some),
            None => Ok(None),
        }
    }
}

impl Codec for EnvelopeCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        archive(envelope).map(|v| v.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        let mut aligned: AlignedVec = AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        unarchive(&aligned)
    }
}

fn archive(envelope: &Envelope) -> Result<AlignedVec, CodecError> {
    rkyv::to_bytes::<rkyv::rancor::Error>(envelope)
        .map_err(|e| CodecError::Serialization(e.to_string()))
}

fn unarchive(bytes: &AlignedVec) -> Result<Envelope, CodecError> {
    rkyv::from_bytes::<Envelope, rkyv::rancor::Error>(bytes)
        .map_err(|e| CodecError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntex_bytes::BufMut;
    use serde_json::json;
    use stratus_core::{EnvelopeKind, Params, RemoteFault};

    fn sample() -> Envelope {
        let mut params = Params::new();
        params.insert("a".into(), json!(2));
        params.insert("b".into(), json!(3));
        Envelope::invoke(9, "calc.add", Some("tenant-a".into()), &params)
            .unwrap()
            .with_attachments([("x-trace-id", "00ff")])
    }

    #[test]
    fn test_framed_stream_of_envelopes() {
        let codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();

        codec.encode_frame(&sample(), &mut buf).unwrap();
        codec
            .encode_frame(&Envelope::fault(9, "calc.add", RemoteFault::new(3, "bad")), &mut buf)
            .unwrap();

        let first = codec.decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(first, sample());
        assert_eq!(first.service_key.as_deref(), Some("tenant-a"));

        let second = codec.decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(second.kind, EnvelopeKind::Fault);
        assert!(codec.decode_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_garbage_frame_is_a_codec_error() {
        let codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32_le(3);
        buf.put_slice(&[0xde, 0xad, 0xbe]);

        assert!(matches!(
            codec.decode_frame(&mut buf),
            Err(CodecError::Deserialization(_))
        ));
    }

    #[test]
    fn test_unframed_codec_accepts_unaligned_input() {
        let codec = EnvelopeCodec::new();
        let bytes = Codec::encode(&codec, &sample()).unwrap();

        // Shift by one byte so the slice is misaligned.
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        let decoded = Codec::decode(&codec, &shifted[1..]).unwrap();
        assert_eq!(decoded.route, "calc.add");
    }
}
