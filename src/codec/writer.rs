//! Frame writer - accumulates typed fields into a byte buffer.
//!
//! Small writes are coalesced into a shared growable tail; large pre-existing
//! `Bytes` ranges are appended as whole chunks without copying. `finish()`
//! produces one contiguous buffer, `into_chunks()` keeps the chunk list for
//! scatter/gather writes.
//!
//! # Example
//!
//! ```
//! use relaywire::codec::FrameWriter;
//!
//! let mut w = FrameWriter::new();
//! w.write_u32(7);
//! w.write_str("ok");
//! let frame = w.finish();
//! assert_eq!(frame.len(), 4 + 4 + 2);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Byte ranges at or above this size are kept as separate chunks instead of
/// being copied into the tail buffer.
const NO_COPY_THRESHOLD: usize = 512;

/// Appends typed values to an internal growable buffer.
///
/// Values must be read back in the exact order they were written.
pub struct FrameWriter {
    /// Completed chunks, in write order.
    chunks: Vec<Bytes>,
    /// Current tail buffer receiving small writes.
    tail: BytesMut,
}

impl FrameWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create an empty writer with a pre-sized tail buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            chunks: Vec::new(),
            tail: BytesMut::with_capacity(capacity),
        }
    }

    /// Append an unsigned 8-bit value.
    pub fn write_u8(&mut self, value: u8) {
        self.tail.put_u8(value);
    }

    /// Append an unsigned 32-bit value, little endian.
    pub fn write_u32(&mut self, value: u32) {
        self.tail.put_u32_le(value);
    }

    /// Append a length-prefixed UTF-8 string (`[len: u32 LE][bytes]`).
    pub fn write_str(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.tail.put_slice(value.as_bytes());
    }

    /// Append a raw byte range (copied into the tail buffer).
    ///
    /// The reader must know the exact length; no length prefix is written.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.tail.put_slice(data);
    }

    /// Append a pre-existing byte range.
    ///
    /// Large chunks are kept as-is without copying; small ones are coalesced
    /// into the tail buffer.
    pub fn write_chunk(&mut self, data: Bytes) {
        if data.len() >= NO_COPY_THRESHOLD {
            self.flush_tail();
            self.chunks.push(data);
        } else {
            self.tail.put_slice(&data);
        }
    }

    /// Total number of bytes written so far.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum::<usize>() + self.tail.len()
    }

    /// Check whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produce a single contiguous buffer.
    ///
    /// Zero-copy when everything landed in one chunk; otherwise the chunks
    /// are concatenated once.
    pub fn finish(mut self) -> Bytes {
        self.flush_tail();
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks.pop().expect("one chunk"),
            _ => {
                let total = self.chunks.iter().map(Bytes::len).sum();
                let mut buf = BytesMut::with_capacity(total);
                for chunk in &self.chunks {
                    buf.put_slice(chunk);
                }
                buf.freeze()
            }
        }
    }

    /// Produce the chunk list in write order, for vectored I/O.
    pub fn into_chunks(mut self) -> Vec<Bytes> {
        self.flush_tail();
        self.chunks
    }

    fn flush_tail(&mut self) {
        if !self.tail.is_empty() {
            let tail = std::mem::take(&mut self.tail);
            self.chunks.push(tail.freeze());
        }
    }
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new()
    }
}
