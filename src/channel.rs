//! Multiplexed request channel.
//!
//! Turns one persistent socket into a call/response RPC surface:
//! 1. Allocate a request id (skipping 0, wrapping at 2^32)
//! 2. Send `[opcode][requestId][payload]` as one message
//! 3. Park the caller on a pending-request entry with a deadline
//! 4. Match the inbound `[requestId][statusCode][payload]` response to the
//!    entry and wake the caller
//!
//! Timeouts, disconnects and peer-side failures surface as typed results;
//! the channel never retries a request on its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};

use crate::codec::{FrameReader, FrameWriter};
use crate::error::{RelaywireError, Result};
use crate::protocol::http::{HttpExecRequest, HttpExecResponse};
use crate::protocol::{
    MessageBuffer, CLOSE_STARTING_NEW, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_REQUEST_TIMEOUT, NOTIFY_REQUEST_ID, OP_EXECUTE_HTTP, STATUS_EXECUTE_EXCEPTION,
    STATUS_OK, STATUS_UNKNOWN_REQUEST,
};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Configuration for a request channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Per-request response deadline. Default: 15 seconds.
    pub request_timeout: Duration,
    /// Bounded wait for [`RequestChannel::wait_connected`]. Default: 5 seconds.
    pub connect_timeout: Duration,
    /// Maximum inbound message size.
    pub max_message_size: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// One result slot per outstanding request.
type PendingSender = oneshot::Sender<Result<Bytes>>;

struct Conn {
    writer: WriterHandle,
    generation: u64,
}

struct Shared {
    config: ChannelConfig,
    /// Next request id; 0 is skipped at allocation time.
    next_id: AtomicU32,
    /// Outstanding requests by id. Never iterated while notifying.
    pending: Mutex<HashMap<u32, PendingSender>>,
    /// Current connection, if any.
    conn: Mutex<Option<Conn>>,
    /// Bumped on every connect/disconnect so stale read tasks can tell they
    /// have been superseded.
    generation: AtomicU64,
    connected: watch::Sender<bool>,
}

/// A multiplexed request channel over one persistent socket.
///
/// Cheaply cloneable; all clones share the same connection and pending table.
#[derive(Clone)]
pub struct RequestChannel {
    shared: Arc<Shared>,
}

impl RequestChannel {
    /// Create a disconnected channel with default configuration.
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    /// Create a disconnected channel with custom configuration.
    pub fn with_config(config: ChannelConfig) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                next_id: AtomicU32::new(1),
                pending: Mutex::new(HashMap::new()),
                conn: Mutex::new(None),
                generation: AtomicU64::new(0),
                connected,
            }),
        }
    }

    /// Connect to `addr`, replacing any current connection.
    ///
    /// The current socket is closed immediately and every outstanding request
    /// fails with a transport-closed error; the new connection is established
    /// in the background. Use [`wait_connected`](Self::wait_connected) to wait
    /// for it with a bounded deadline.
    pub fn connect(&self, addr: impl Into<String>) {
        let addr = addr.into();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.teardown(generation);

        let shared = self.shared.clone();
        tokio::spawn(async move {
            match TcpStream::connect(&addr).await {
                Ok(stream) => shared.install(stream, generation),
                Err(e) => {
                    tracing::warn!(addr = %addr, error = %e, "connection attempt failed");
                }
            }
        });
    }

    /// Close the current connection, failing all outstanding requests.
    pub fn disconnect(&self) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.teardown(generation);
    }

    /// Wait until the channel is connected, bounded by the configured
    /// connect timeout so startup code can proceed degraded instead of
    /// hanging.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.shared.connected.subscribe();
        let wait = rx.wait_for(|connected| *connected);
        let result = match tokio::time::timeout(self.shared.config.connect_timeout, wait).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(RelaywireError::ConnectionClosed),
            Err(_) => Err(RelaywireError::Timeout),
        };
        result
    }

    /// Whether a live connection is currently installed.
    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.lock_pending().len()
    }

    /// Issue a request and wait for the matching response.
    ///
    /// Fails immediately with [`RelaywireError::NotConnected`] when no socket
    /// is open, with [`RelaywireError::Timeout`] when no response arrives
    /// within the deadline, and with [`RelaywireError::ConnectionClosed`] when
    /// the transport drops mid-flight. The request is never retried here;
    /// retry policy belongs to the caller.
    pub async fn call(&self, opcode: u32, payload: Bytes) -> Result<Bytes> {
        let (writer, generation) = {
            let conn = self.shared.lock_conn();
            match conn.as_ref() {
                Some(c) if c.writer.is_open() => (c.writer.clone(), c.generation),
                _ => return Err(RelaywireError::NotConnected),
            }
        };

        let request_id = self.shared.alloc_id();
        let (tx, rx) = oneshot::channel();
        self.shared.lock_pending().insert(request_id, tx);

        // A teardown landing between the connection grab and the insert above
        // has already drained the pending table; this entry would otherwise
        // sit out the full request timeout.
        let still_current = self
            .shared
            .lock_conn()
            .as_ref()
            .map(|c| c.generation)
            == Some(generation);
        if !still_current {
            self.shared.lock_pending().remove(&request_id);
            return Err(RelaywireError::ConnectionClosed);
        }

        let mut w = FrameWriter::with_capacity(16 + payload.len());
        w.write_u32(opcode);
        w.write_u32(request_id);
        w.write_chunk(payload);

        if let Err(e) = writer.send(w.finish()).await {
            self.shared.lock_pending().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.shared.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without a response: connection torn down
            Ok(Err(_)) => Err(RelaywireError::ConnectionClosed),
            Err(_) => {
                self.shared.lock_pending().remove(&request_id);
                Err(RelaywireError::Timeout)
            }
        }
    }

    /// Execute an HTTP request at the proxy peer.
    ///
    /// Convenience wrapper around [`call`](Self::call) with
    /// [`OP_EXECUTE_HTTP`], encoding the request and decoding the response
    /// payload.
    pub async fn execute_http(&self, request: &HttpExecRequest) -> Result<HttpExecResponse> {
        let payload = request.encode()?;
        let raw = self.call(OP_EXECUTE_HTTP, payload).await?;
        HttpExecResponse::decode(raw)
    }
}

impl Default for RequestChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u32, PendingSender>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Option<Conn>> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate the next request id, skipping 0 on wraparound.
    fn alloc_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != NOTIFY_REQUEST_ID {
                return id;
            }
        }
    }

    /// Close the current connection and fail everything outstanding.
    fn teardown(&self, new_generation: u64) {
        let had_conn = {
            let mut conn = self.lock_conn();
            conn.take().is_some()
        };
        if had_conn {
            tracing::debug!(
                close_code = CLOSE_STARTING_NEW,
                generation = new_generation,
                "closing connection: starting new connection"
            );
        }
        let _ = self.connected.send(false);
        self.fail_all_pending();
    }

    /// Install a freshly connected socket, unless superseded meanwhile.
    fn install(self: Arc<Self>, stream: TcpStream, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(generation, "discarding superseded connection");
            return;
        }

        let (read_half, write_half) = stream.into_split();
        let (writer, _writer_task) = spawn_writer_task(write_half);

        {
            let mut conn = self.lock_conn();
            *conn = Some(Conn { writer, generation });
        }
        let _ = self.connected.send(true);

        let shared = self.clone();
        tokio::spawn(async move {
            shared.read_loop(read_half, generation).await;
            shared.connection_lost(generation);
        });
    }

    async fn read_loop(
        &self,
        mut reader: tokio::net::tcp::OwnedReadHalf,
        generation: u64,
    ) {
        let mut reassembly = MessageBuffer::with_max_message(self.config.max_message_size);
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(generation, error = %e, "read error");
                    return;
                }
            };

            let frames = match reassembly.push(&buf[..n]) {
                Ok(frames) => frames,
                Err(e) => {
                    tracing::warn!(generation, error = %e, "closing connection on framing error");
                    return;
                }
            };

            for frame in frames {
                self.handle_inbound(frame);
            }
        }
    }

    /// Match one inbound response frame to its pending request.
    ///
    /// Decode errors are fatal to this frame only. Deliveries are idempotent:
    /// an id with no pending entry (late or duplicate response) is dropped.
    fn handle_inbound(&self, frame: Bytes) {
        let mut r = FrameReader::new(frame);
        let request_id = match r.read_u32() {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed inbound frame");
                return;
            }
        };

        if request_id == NOTIFY_REQUEST_ID {
            tracing::debug!("ignoring unsolicited server notification");
            return;
        }

        let sender = self.lock_pending().remove(&request_id);
        let Some(sender) = sender else {
            tracing::debug!(request_id, "dropping response with no pending request");
            return;
        };

        // The receiver may have timed out already; ignore delivery failure.
        let _ = sender.send(Self::parse_response(&mut r));
    }

    fn parse_response(r: &mut FrameReader) -> Result<Bytes> {
        let status = r.read_u32()?;
        match status {
            STATUS_OK => Ok(r.read_rest()),
            STATUS_EXECUTE_EXCEPTION => Err(RelaywireError::ExecuteException(r.read_str()?)),
            STATUS_UNKNOWN_REQUEST => {
                let message = r
                    .read_str()
                    .unwrap_or_else(|_| "peer has no handler for this request type".to_string());
                Err(RelaywireError::UnknownRequest(message))
            }
            other => Err(RelaywireError::ExecuteException(format!(
                "protocol violation: unexpected status code {:#x}",
                other
            ))),
        }
    }

    fn connection_lost(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            // A newer connection already replaced this one; teardown handled
            // the pending table.
            return;
        }

        tracing::debug!(generation, "connection lost");
        {
            let mut conn = self.lock_conn();
            if conn.as_ref().map(|c| c.generation) == Some(generation) {
                *conn = None;
            }
        }
        let _ = self.connected.send(false);
        self.fail_all_pending();
    }

    fn fail_all_pending(&self) {
        // Snapshot before notifying so a callback issuing a new call cannot
        // observe the table mid-mutation.
        let senders: Vec<PendingSender> = {
            let mut pending = self.lock_pending();
            pending.drain().map(|(_, sender)| sender).collect()
        };
        let failed = senders.len();
        for sender in senders {
            let _ = sender.send(Err(RelaywireError::ConnectionClosed));
        }
        if failed > 0 {
            tracing::debug!(failed, "failed outstanding requests on close");
        }
    }
}
