//! Wire protocol constants and message framing.
//!
//! Every socket message is length-delimited:
//! ```text
//! ┌──────────────┬─────────────────┐
//! │ Length       │ Frame bytes     │
//! │ 4 bytes, LE  │ Length bytes    │
//! └──────────────┴─────────────────┘
//! ```
//!
//! Frame layouts (all integers little endian, `varstring` =
//! `[len: u32][utf8 bytes]`):
//! ```text
//! client -> server: [opcode: u32][requestId: u32][payload: bytes]
//! server -> client: [requestId: u32][statusCode: u32][payload: bytes]
//! ```
//! `requestId` 0 on the response path marks an unsolicited notification and
//! is never dispatched to a pending request. Field order is the contract;
//! there is no self-describing schema on the wire.

pub mod http;

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::error::{RelaywireError, Result};

/// Wire layout version documented by this module. Peers that introduce a new
/// layout must allocate new opcodes; unknown opcodes fall into the
/// unknown-request path.
pub const WIRE_VERSION: u32 = 1;

/// Size of the outer length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum message size (64 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 64 * 1024 * 1024;

/// Request type: execute an outbound HTTP request at the proxy.
pub const OP_EXECUTE_HTTP: u32 = 0x01;

/// Response status: success, remaining bytes are the raw response payload.
pub const STATUS_OK: u32 = 0x00;

/// Response status: the peer's handler threw; a varstring message follows.
pub const STATUS_EXECUTE_EXCEPTION: u32 = 0xFE;

/// Response status: the peer has no handler for the request type.
pub const STATUS_UNKNOWN_REQUEST: u32 = 0xFF;

/// Request id reserved for unsolicited server-to-client notifications.
pub const NOTIFY_REQUEST_ID: u32 = 0;

/// Close code logged when a connection is replaced by a newer one.
pub const CLOSE_STARTING_NEW: u16 = 3001;

/// Per-request response deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Bounded wait for connection establishment.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// State machine for message reassembly.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for the 4-byte length prefix.
    WaitingForLength,
    /// Length parsed, waiting for the message body.
    WaitingForBody { remaining: u32 },
}

/// Buffer for accumulating socket reads and extracting complete messages.
///
/// Handles fragmented reads: partial data is kept internally until the next
/// push completes a message. Oversized length prefixes are a protocol error.
pub struct MessageBuffer {
    buffer: BytesMut,
    state: State,
    max_message_size: u32,
}

impl MessageBuffer {
    /// Create a buffer with the default 64 MB message limit.
    pub fn new() -> Self {
        Self::with_max_message(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a buffer with a custom message size limit.
    pub fn with_max_message(max_message_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForLength,
            max_message_size,
        }
    }

    /// Push raw bytes from a socket read and extract all complete messages.
    ///
    /// Returns the frame bytes of each completed message, without the length
    /// prefix. May return an empty vector while a message is still partial.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        while let Some(message) = self.try_extract_one()? {
            messages.push(message);
        }
        Ok(messages)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        match &self.state {
            State::WaitingForLength => {
                if self.buffer.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }

                let length = u32::from_le_bytes(
                    self.buffer[..LENGTH_PREFIX_SIZE]
                        .try_into()
                        .expect("checked length"),
                );
                if length > self.max_message_size {
                    return Err(RelaywireError::Protocol(format!(
                        "message size {} exceeds maximum {}",
                        length, self.max_message_size
                    )));
                }

                let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);

                if length == 0 {
                    return Ok(Some(Bytes::new()));
                }

                self.state = State::WaitingForBody { remaining: length };
                self.try_extract_one()
            }

            State::WaitingForBody { remaining } => {
                let remaining = *remaining as usize;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let message = self.buffer.split_to(remaining).freeze();
                self.state = State::WaitingForLength;
                Ok(Some(message))
            }
        }
    }

    /// Number of buffered bytes awaiting reassembly.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer holds no partial data.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop buffered data and reset the state machine.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Prepend the length prefix to a frame, producing one wire message.
pub fn encode_message(frame: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + frame.len());
    buf.extend_from_slice(&(frame.len() as u32).to_le_bytes());
    buf.extend_from_slice(frame);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message(frame: &[u8]) -> Vec<u8> {
        encode_message(frame).to_vec()
    }

    #[test]
    fn test_single_complete_message() {
        let mut buffer = MessageBuffer::new();
        let messages = buffer.push(&make_message(b"hello")).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_messages_in_one_push() {
        let mut buffer = MessageBuffer::new();
        let mut data = make_message(b"first");
        data.extend(make_message(b"second"));
        data.extend(make_message(b"third"));

        let messages = buffer.push(&data).unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(&messages[0][..], b"first");
        assert_eq!(&messages[1][..], b"second");
        assert_eq!(&messages[2][..], b"third");
    }

    #[test]
    fn test_fragmented_length_prefix() {
        let mut buffer = MessageBuffer::new();
        let data = make_message(b"test");

        assert!(buffer.push(&data[..2]).unwrap().is_empty());
        let messages = buffer.push(&data[2..]).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"test");
    }

    #[test]
    fn test_fragmented_body() {
        let mut buffer = MessageBuffer::new();
        let data = make_message(b"a longer message body");

        assert!(buffer.push(&data[..10]).unwrap().is_empty());
        let messages = buffer.push(&data[10..]).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"a longer message body");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = MessageBuffer::new();
        let data = make_message(b"hi");

        let mut all = Vec::new();
        for byte in &data {
            all.extend(buffer.push(&[*byte]).unwrap());
        }
        assert_eq!(all.len(), 1);
        assert_eq!(&all[0][..], b"hi");
    }

    #[test]
    fn test_empty_message() {
        let mut buffer = MessageBuffer::new();
        let messages = buffer.push(&make_message(b"")).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_empty());
    }

    #[test]
    fn test_max_message_size_enforced() {
        let mut buffer = MessageBuffer::with_max_message(16);
        let result = buffer.push(&1000u32.to_le_bytes());
        assert!(matches!(result, Err(RelaywireError::Protocol(_))));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = MessageBuffer::new();
        let data = make_message(b"partial");
        buffer.push(&data[..6]).unwrap();
        assert!(!buffer.is_empty());

        buffer.clear();
        assert!(buffer.is_empty());

        // A fresh message parses from scratch
        let messages = buffer.push(&make_message(b"ok")).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_complete_plus_partial() {
        let mut buffer = MessageBuffer::new();
        let first = make_message(b"one");
        let second = make_message(b"two");

        let mut data = first;
        data.extend_from_slice(&second[..3]);

        let messages = buffer.push(&data).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"one");

        let messages = buffer.push(&second[3..]).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"two");
    }
}
