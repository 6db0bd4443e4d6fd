//! Length-prefixed framing for byte-stream transports
//!
//! Each frame is a big-endian `u32` body length followed by the JSON
//! encoding of one `Envelope`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::message::Envelope;
use super::ProtocolError;

/// Largest accepted frame body
pub const MAX_FRAME_LEN: usize = 64 * 1024;
const HEADER_LEN: usize = 4;

/// Encode one envelope as a frame
pub fn encode_frame(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let body = serde_json::to_vec(envelope)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Reassembles frames from arbitrarily chunked input
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete envelope, `Ok(None)` when more bytes are needed.
    /// A frame that fails to parse is consumed so decoding can continue;
    /// an oversized header discards everything buffered.
    pub fn next_frame(&mut self) -> Result<Option<Envelope>, ProtocolError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &self.buf[..HEADER_LEN];
        let len = header.get_u32() as usize;
        if len > MAX_FRAME_LEN {
            self.buf.clear();
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let body = self.buf.split_to(len);
        let envelope = serde_json::from_slice(&body)?;
        Ok(Some(envelope))
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
