//! Proxy server - the remote peer of the request channel.
//!
//! Accepts connections on a fixed host/port with a bounded backlog. Each
//! connection is handled independently: a read loop reassembles messages,
//! decodes `[opcode][requestId][payload]`, and dispatches to the shared
//! read-only [`DispatchTable`]. Responses go back as
//! `[requestId][statusCode][payload]`.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::Semaphore;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::{RelaywireError, Result};
use crate::handler::{DispatchTable, HttpExecuteConfig, HttpExecuteHandler};
use crate::protocol::{
    MessageBuffer, DEFAULT_MAX_MESSAGE_SIZE, OP_EXECUTE_HTTP, STATUS_EXECUTE_EXCEPTION, STATUS_OK,
    STATUS_UNKNOWN_REQUEST,
};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Default maximum concurrent in-flight requests per connection.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 256;

/// Configuration for the proxy server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host. Default: all interfaces.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// Maximum inbound message size.
    pub max_message_size: u32,
    /// Per-connection concurrent request limit; requests beyond the limit
    /// are dropped with a warning.
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9412,
            backlog: 128,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

/// A bound proxy server ready to accept connections.
pub struct ProxyServer {
    listener: tokio::net::TcpListener,
    table: Arc<DispatchTable>,
    config: ServerConfig,
}

impl ProxyServer {
    /// Bind a server with an explicit dispatch table.
    pub fn bind(config: ServerConfig, table: DispatchTable) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| RelaywireError::Protocol(format!("invalid bind address: {}", e)))?;

        let socket = if addr.is_ipv6() {
            TcpSocket::new_v6()?
        } else {
            TcpSocket::new_v4()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(config.backlog)?;

        Ok(Self {
            listener,
            table: Arc::new(table),
            config,
        })
    }

    /// Bind a server with the standard table: the HTTP execute handler on
    /// opcode [`OP_EXECUTE_HTTP`].
    pub fn bind_with_http(config: ServerConfig, http: &HttpExecuteConfig) -> Result<Self> {
        let mut table = DispatchTable::new();
        table.register(OP_EXECUTE_HTTP, HttpExecuteHandler::new(http)?);
        Self::bind(config, table)
    }

    /// The address the server actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "proxy server listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            tracing::debug!(%peer, "connection accepted");
            let table = self.table.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                handle_connection(stream, table, config).await;
                tracing::debug!(%peer, "connection closed");
            });
        }
    }
}

/// Per-connection read loop.
async fn handle_connection(stream: TcpStream, table: Arc<DispatchTable>, config: ServerConfig) {
    let (mut reader, write_half) = stream.into_split();
    let (writer, _writer_task) = spawn_writer_task(write_half);
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests));

    let mut reassembly = MessageBuffer::with_max_message(config.max_message_size);
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "connection read error");
                return;
            }
        };

        let frames = match reassembly.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(error = %e, "dropping connection on framing error");
                return;
            }
        };

        for frame in frames {
            dispatch_frame(frame, &table, &writer, &semaphore);
        }
    }
}

/// Decode one request frame and spawn its handler.
fn dispatch_frame(
    frame: Bytes,
    table: &Arc<DispatchTable>,
    writer: &WriterHandle,
    semaphore: &Arc<Semaphore>,
) {
    let mut r = FrameReader::new(frame);
    let (opcode, request_id) = match (r.read_u32(), r.read_u32()) {
        (Ok(opcode), Ok(request_id)) => (opcode, request_id),
        _ => {
            tracing::warn!("dropping malformed request frame");
            return;
        }
    };
    let payload = r.read_rest();

    let permit = match semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!(request_id, opcode, "handler capacity reached, dropping request");
            return;
        }
    };

    let writer = writer.clone();
    match table.get(opcode) {
        Some(handler) => {
            let fut = handler.call(payload);
            tokio::spawn(async move {
                let _permit = permit;
                let frame = match fut.await {
                    Ok(body) => encode_ok_response(request_id, body),
                    Err(e) => {
                        tracing::debug!(request_id, error = %e, "handler failed");
                        encode_status_response(request_id, STATUS_EXECUTE_EXCEPTION, &e.to_string())
                    }
                };
                if let Err(e) = writer.send(frame).await {
                    tracing::debug!(request_id, error = %e, "failed to queue response");
                }
            });
        }
        None => {
            let frame = encode_status_response(
                request_id,
                STATUS_UNKNOWN_REQUEST,
                &format!("unknown request type {:#x}", opcode),
            );
            tokio::spawn(async move {
                let _permit = permit;
                let _ = writer.send(frame).await;
            });
        }
    }
}

fn encode_ok_response(request_id: u32, payload: Bytes) -> Bytes {
    let mut w = FrameWriter::with_capacity(16 + payload.len());
    w.write_u32(request_id);
    w.write_u32(STATUS_OK);
    w.write_chunk(payload);
    w.finish()
}

fn encode_status_response(request_id: u32, status: u32, message: &str) -> Bytes {
    let mut w = FrameWriter::with_capacity(16 + message.len());
    w.write_u32(request_id);
    w.write_u32(status);
    w.write_str(message);
    w.finish()
}
