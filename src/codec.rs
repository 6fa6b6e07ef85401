//! Fixed-length framing for byte streams.
//!
//! Frames on this protocol carry no length prefix, so a stream is split into
//! frames purely by byte count. [`FixedFrameCodec`] plugs that rule into
//! `tokio_util`'s [`Framed`](tokio_util::codec::Framed) machinery and is what
//! node clients use to read whole transaction frames.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::TRANSACTION_LEN;

/// Codec yielding frames of exactly `frame_len` bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedFrameCodec {
    frame_len: usize,
}

impl FixedFrameCodec {
    /// Create a codec for frames of `frame_len` bytes (at least one).
    #[must_use]
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.max(1),
        }
    }

    /// Codec for 32-byte transaction frames.
    #[must_use]
    pub fn transaction() -> Self { Self::new(TRANSACTION_LEN) }

    /// Configured frame length.
    #[must_use]
    pub const fn frame_len(&self) -> usize { self.frame_len }
}

impl Decoder for FixedFrameCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < self.frame_len {
            src.reserve(self.frame_len - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(self.frame_len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended inside a frame ({} trailing bytes)", src.len()),
            )),
        }
    }
}

impl Encoder<Bytes> for FixedFrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() != self.frame_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame must be {} bytes, got {}", self.frame_len, item.len()),
            ));
        }
        dst.reserve(item.len());
        dst.put(item);
        Ok(())
    }
}
