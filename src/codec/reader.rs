//! Frame reader - consumes typed fields from a byte buffer in write order.
//!
//! Maintains a cursor over a `Bytes` buffer. Every read checks the declared
//! buffer length first and fails with an out-of-bounds error instead of
//! panicking, so a malformed frame is fatal to that frame only.

use bytes::Bytes;

use crate::error::{RelaywireError, Result};

/// Cursor-based reader over a frame buffer.
pub struct FrameReader {
    buf: Bytes,
    pos: usize,
}

impl FrameReader {
    /// Create a reader positioned at the start of the buffer.
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read an unsigned 8-bit value.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.check(1)?;
        let value = self.buf[self.pos];
        self.pos += 1;
        Ok(value)
    }

    /// Read an unsigned 32-bit value, little endian.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.check(4)?;
        let bytes: [u8; 4] = self.buf[self.pos..self.pos + 4]
            .try_into()
            .expect("checked length");
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Read a length-prefixed UTF-8 string (`[len: u32 LE][bytes]`).
    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let raw = self.read_bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| RelaywireError::Protocol(format!("invalid UTF-8 in string field: {}", e)))
    }

    /// Read exactly `len` raw bytes (zero-copy slice of the frame).
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.check(len)?;
        let slice = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(slice)
    }

    /// Read everything from the cursor to the end of the buffer.
    pub fn read_rest(&mut self) -> Bytes {
        let slice = self.buf.slice(self.pos..);
        self.pos = self.buf.len();
        slice
    }

    fn check(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(RelaywireError::OutOfBounds {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }
}
