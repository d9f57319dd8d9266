//! Error types for relaywire.

use thiserror::Error;

/// Main error type for all relaywire operations.
#[derive(Debug, Error)]
pub enum RelaywireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (request head only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame read would run past the end of the buffer.
    #[error("frame decode out of bounds: needed {needed} bytes, {available} available")]
    OutOfBounds { needed: usize, available: usize },

    /// Protocol error (oversized message, malformed field, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// HTTP client error while building or performing an outbound fetch.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// No live transport at call time.
    #[error("not connected")]
    NotConnected,

    /// No response arrived within the request deadline.
    #[error("request timed out")]
    Timeout,

    /// The peer has no handler for the request type.
    #[error("unknown request: {0}")]
    UnknownRequest(String),

    /// The peer's handler failed while executing the request.
    #[error("execute exception: {0}")]
    ExecuteException(String),

    /// Transport closed while requests were outstanding.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias using RelaywireError.
pub type Result<T> = std::result::Result<T, RelaywireError>;
