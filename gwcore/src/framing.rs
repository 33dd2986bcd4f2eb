//! Outer framing on the TCP stream.
//!
//! Each frame is a 4-byte little-endian length followed by one compressed
//! container.

use bytes::{Buf, Bytes, BytesMut};
use log::{trace, warn};

pub const FRAME_LENGTH_SIZE: usize = 4;
/// Upper bound for a single container; anything larger is a desynced stream.
pub const FRAME_MAX_SIZE: usize = 64 * 1024;

/// Prepends the length prefix to a container.
pub fn encode_frame(container: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
    let len = container.len();
    if len > FRAME_MAX_SIZE {
        return Err(anyhow::anyhow!(
            "Frame is too large (max: {}, got: {})",
            FRAME_MAX_SIZE,
            len
        ));
    }

    let mut data = Vec::with_capacity(FRAME_LENGTH_SIZE + len);
    data.extend_from_slice(&(len as u32).to_le_bytes());
    data.extend_from_slice(container);
    Ok(data)
}

/// Buffers raw stream chunks and yields complete frames.
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete frame body, or `None` until more data arrives.
    ///
    /// An oversized length prefix means the stream lost sync; the buffer is
    /// discarded so the caller can keep reading from a clean slate.
    pub fn decode_frame(&mut self) -> Option<Bytes> {
        if self.buffer.len() < FRAME_LENGTH_SIZE {
            return None;
        }

        let frame_len = u32::from_le_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;

        if frame_len > FRAME_MAX_SIZE {
            warn!(
                "Discarding {} buffered bytes after oversized frame length {}",
                self.buffer.len(),
                frame_len
            );
            self.buffer.clear();
            return None;
        }

        if self.buffer.len() >= FRAME_LENGTH_SIZE + frame_len {
            self.buffer.advance(FRAME_LENGTH_SIZE);
            let frame_data = self.buffer.split_to(frame_len).freeze();
            trace!("<-- Decoded frame: {} bytes", frame_data.len());
            Some(frame_data)
        } else {
            None
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
