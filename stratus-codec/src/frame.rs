//! Length-prefixed framing.

use ntex_bytes::{Buf, BufMut, BytesMut};
use ntex_codec::{Decoder, Encoder};
use rkyv::util::AlignedVec;

use stratus_core::CodecError;

/// Default maximum frame size (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Length-prefixed frame codec.
///
/// ```text
/// +----------------+------------------+
/// | Length (4 LE)  | Payload (N bytes)|
/// +----------------+------------------+
/// ```
///
/// Decoded frames are copied into an `AlignedVec` so archived envelopes can
/// be validated in place.
///
/// ```rust
/// use stratus_codec::FrameCodec;
/// use ntex_bytes::BytesMut;
/// use ntex_codec::Decoder;
///
/// let codec = FrameCodec::new();
/// let mut buf = BytesMut::new();
/// codec.encode_slice(b"hello", &mut buf).unwrap();
///
/// let frame = codec.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(frame.as_slice(), b"hello");
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec with the default frame limit.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a codec with a custom frame limit.
    #[inline]
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Get the maximum frame size.
    #[inline]
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_len(&self, size: usize) -> Result<(), CodecError> {
        if size > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    /// Write one frame holding `item` into `dst`.
    pub fn encode_slice(&self, item: &[u8], dst: &mut BytesMut) -> Result<(), CodecError> {
        self.check_len(item.len())?;
        dst.reserve(LEN_PREFIX + item.len());
        dst.put_u32_le(item.len() as u32);
        dst.put_slice(item);
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = AlignedVec;
    type Error = CodecError;

    fn decode(&self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        self.check_len(len)?;

        let total = LEN_PREFIX + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let data = src.split_to(len);

        let mut aligned: AlignedVec = AlignedVec::with_capacity(len);
        aligned.extend_from_slice(&data);
        Ok(Some(aligned))
    }
}

impl Encoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = CodecError;

    fn encode(&self, item: Self::Item, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_slice(&item, dst)
    }
}
