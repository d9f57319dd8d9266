//! Application payload for the "execute HTTP request" operation.
//!
//! Request payload:
//! ```text
//! [jsonHeadVarString][bodyLength: u32][bodyBytes]
//! ```
//! Response payload:
//! ```text
//! [resultByte: u8]
//!   0|1 -> [statusCode: u32][statusText: varstring][headerCount: u32]
//!          { [key: varstring][value: varstring] }*
//!          [payloadLength: u32][payloadBytes]
//!   2   -> [message: varstring]
//! ```
//! Result byte 0 means the exchange completed successfully, 1 means the
//! remote answered with a failure status, 2 means the proxy hit an internal
//! exception while performing the fetch.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::{FrameReader, FrameWriter};
use crate::error::{RelaywireError, Result};

/// Result byte: exchange completed, remote reported success.
pub const RESULT_OK: u8 = 0;
/// Result byte: exchange completed, remote reported failure.
pub const RESULT_REMOTE_FAILURE: u8 = 1;
/// Result byte: the fetch itself failed inside the proxy.
pub const RESULT_EXCEPTION: u8 = 2;

/// JSON head object describing the HTTP call to perform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpRequestHead {
    /// Target URL.
    pub url: String,
    /// HTTP method, default GET.
    #[serde(default = "default_method")]
    pub method: String,
    /// Request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl HttpRequestHead {
    /// Create a GET head for a URL with no extra headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: HashMap::new(),
        }
    }
}

/// A complete "execute HTTP request" payload.
#[derive(Debug, Clone)]
pub struct HttpExecRequest {
    /// Describes the call to perform.
    pub head: HttpRequestHead,
    /// Optional request body (empty = none).
    pub body: Bytes,
}

impl HttpExecRequest {
    /// Create a body-less request from a head.
    pub fn new(head: HttpRequestHead) -> Self {
        Self {
            head,
            body: Bytes::new(),
        }
    }

    /// Encode into the wire payload.
    pub fn encode(&self) -> Result<Bytes> {
        let head_json = serde_json::to_string(&self.head)?;
        let mut w = FrameWriter::with_capacity(64 + head_json.len() + self.body.len());
        w.write_str(&head_json);
        w.write_u32(self.body.len() as u32);
        w.write_chunk(self.body.clone());
        Ok(w.finish())
    }

    /// Decode from the wire payload.
    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        let head_json = r.read_str()?;
        let head: HttpRequestHead = serde_json::from_str(&head_json)?;
        let body_len = r.read_u32()? as usize;
        let body = r.read_bytes(body_len)?;
        Ok(Self { head, body })
    }
}

/// Result of an HTTP exchange performed by the proxy.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    /// Remote HTTP status code.
    pub status: u32,
    /// Remote status text ("ok", "Not Found", ...).
    pub status_text: String,
    /// Response headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Bytes,
    /// Whether the remote reported success (drives result byte 0 vs 1).
    pub ok: bool,
}

/// Response payload for the "execute HTTP request" operation.
#[derive(Debug, Clone)]
pub enum HttpExecResponse {
    /// The exchange completed; the remote may still have reported failure.
    Exchange(HttpExchange),
    /// The proxy hit an exception while performing the fetch.
    Exception(String),
}

impl HttpExecResponse {
    /// Encode into the wire payload.
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Exchange(ex) => {
                let mut w = FrameWriter::with_capacity(64 + ex.body.len());
                w.write_u8(if ex.ok { RESULT_OK } else { RESULT_REMOTE_FAILURE });
                w.write_u32(ex.status);
                w.write_str(&ex.status_text);
                w.write_u32(ex.headers.len() as u32);
                for (key, value) in &ex.headers {
                    w.write_str(key);
                    w.write_str(value);
                }
                w.write_u32(ex.body.len() as u32);
                w.write_chunk(ex.body.clone());
                w.finish()
            }
            Self::Exception(message) => {
                let mut w = FrameWriter::with_capacity(8 + message.len());
                w.write_u8(RESULT_EXCEPTION);
                w.write_str(message);
                w.finish()
            }
        }
    }

    /// Decode from the wire payload.
    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        let result = r.read_u8()?;
        match result {
            RESULT_OK | RESULT_REMOTE_FAILURE => {
                let status = r.read_u32()?;
                let status_text = r.read_str()?;
                let header_count = r.read_u32()?;
                let mut headers = Vec::with_capacity(header_count as usize);
                for _ in 0..header_count {
                    let key = r.read_str()?;
                    let value = r.read_str()?;
                    headers.push((key, value));
                }
                let body_len = r.read_u32()? as usize;
                let body = r.read_bytes(body_len)?;
                Ok(Self::Exchange(HttpExchange {
                    status,
                    status_text,
                    headers,
                    body,
                    ok: result == RESULT_OK,
                }))
            }
            RESULT_EXCEPTION => Ok(Self::Exception(r.read_str()?)),
            other => Err(RelaywireError::Protocol(format!(
                "unknown HTTP execute result byte {:#x}",
                other
            ))),
        }
    }
}
