//! Connect streaming envelope framing.
//!
//! Each message on a streaming call is prefixed by one flag byte and a
//! big-endian `u32` payload length. The final message of a response carries
//! the end-of-stream flag and a JSON trailer instead of a response message.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::TransportError;

pub const FLAG_COMPRESSED: u8 = 0x01;
pub const FLAG_END_STREAM: u8 = 0x02;

const PREFIX_LEN: usize = 5;

/// Upper bound on a single envelope payload; anything larger is treated as a
/// corrupt length prefix rather than buffered.
const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn is_end_stream(&self) -> bool {
        self.flags & FLAG_END_STREAM != 0
    }
}

/// Frame a payload for the wire.
pub fn encode(flags: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PREFIX_LEN + payload.len());
    buf.put_u8(flags);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Incremental decoder: feed it body chunks as they arrive and pull complete
/// frames out. Chunk boundaries need not line up with frame boundaries.
#[derive(Debug, Default)]
pub struct EnvelopeDecoder {
    buf: BytesMut,
}

impl EnvelopeDecoder {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// True when a partial frame is still buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        if self.buf.len() < PREFIX_LEN {
            return Ok(None);
        }
        let flags = self.buf[0];
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;

        if flags & FLAG_COMPRESSED != 0 {
            return Err(TransportError::Protocol(
                "received compressed envelope, but no compression was negotiated".into(),
            ));
        }
        if len > MAX_PAYLOAD_LEN {
            return Err(TransportError::Protocol(format!(
                "envelope of {len} bytes exceeds limit of {MAX_PAYLOAD_LEN}"
            )));
        }
        if self.buf.len() < PREFIX_LEN + len {
            return Ok(None);
        }

        self.buf.advance(PREFIX_LEN);
        let payload = self.buf.split_to(len).freeze();
        Ok(Some(Frame { flags, payload }))
    }
}
