//! Newline-delimited frame protocol
//!
//! One logical message per line:
//! ```text
//! +------------------+----+
//! | payload (JSON)   | \n |
//! +------------------+----+
//! ```
//!
//! The codec buffers partial input, so a frame split across reads decodes
//! once the terminating newline arrives.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;

/// Maximum frame size including the delimiter (64 KB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Encode one payload as a frame into the buffer
pub fn encode(payload: &[u8], buf: &mut BytesMut) {
    buf.reserve(payload.len() + 1);
    buf.put_slice(payload);
    buf.put_u8(b'\n');
}

/// Encode one payload as a frame into a new `Bytes`
pub fn encode_to_bytes(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    encode(payload, &mut buf);
    buf.freeze()
}

/// Frame decoder for streaming use
#[derive(Debug)]
pub struct FrameCodec {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new frame codec with the default frame size limit
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a new frame codec with a custom frame size limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_frame_size,
        }
    }

    /// Feed data into the codec
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame
    ///
    /// Returns `Ok(Some(payload))` with the delimiter stripped,
    /// `Ok(None)` if more data is needed, or an error when the buffered
    /// line exceeds the frame size limit.
    pub fn decode_next(&mut self) -> io::Result<Option<Bytes>> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if pos + 1 > self.max_frame_size {
                    return Err(frame_too_large(pos + 1, self.max_frame_size));
                }
                let mut line = self.buffer.split_to(pos);
                self.buffer.advance(1);
                // Tolerate CRLF from line-oriented clients
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                Ok(Some(line.freeze()))
            }
            None => {
                if self.buffer.len() >= self.max_frame_size {
                    return Err(frame_too_large(self.buffer.len(), self.max_frame_size));
                }
                Ok(None)
            }
        }
    }

    /// Get the current buffer length
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn frame_too_large(len: usize, max: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Frame too large: {} bytes (max: {})", len, max),
    )
}
