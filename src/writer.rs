//! Dedicated writer task for outbound messages.
//!
//! Frames are queued through an mpsc channel to a single task that owns the
//! socket write half. The channel bound provides backpressure; the task
//! batches ready messages into a single vectored write where possible.
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► mpsc::Sender<OutboundMessage> ─► Writer Task ─► Socket
//! Caller N ─┘
//! ```

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{RelaywireError, Result};
use crate::protocol::LENGTH_PREFIX_SIZE;

/// Default writer channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum messages to batch in a single vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// A length-prefixed message ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundMessage {
    /// Pre-encoded length prefix (4 bytes, little endian).
    prefix: [u8; LENGTH_PREFIX_SIZE],
    /// Frame bytes.
    frame: Bytes,
}

impl OutboundMessage {
    /// Wrap a frame into a wire message.
    pub fn new(frame: Bytes) -> Self {
        Self {
            prefix: (frame.len() as u32).to_le_bytes(),
            frame,
        }
    }

    /// Total size on the wire (prefix + frame).
    pub fn size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.frame.len()
    }
}

/// Handle for queueing messages to the writer task. Cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundMessage>,
}

impl WriterHandle {
    /// Queue a frame for writing.
    ///
    /// Waits when the channel is at capacity; fails with
    /// [`RelaywireError::ConnectionClosed`] once the writer task has stopped.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(OutboundMessage::new(frame))
            .await
            .map_err(|_| RelaywireError::ConnectionClosed)
    }

    /// Check whether the writer task is still accepting messages.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Spawn the writer task over a socket write half.
pub fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task_with_capacity(writer, DEFAULT_CHANNEL_CAPACITY)
}

/// Spawn the writer task with a custom channel capacity.
pub fn spawn_writer_task_with_capacity<W>(
    writer: W,
    capacity: usize,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Main writer loop - drains the channel and writes message batches.
async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundMessage>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(message) => message,
            // Channel closed, clean shutdown
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
    }
}

/// Write a batch of messages with a single vectored write where possible.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundMessage]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);
    for message in batch {
        slices.push(IoSlice::new(&message.prefix));
        if !message.frame.is_empty() {
            slices.push(IoSlice::new(&message.frame));
        }
    }

    let total_size: usize = batch.iter().map(OutboundMessage::size).sum();
    let written = writer.write_vectored(&slices).await?;

    if written == 0 {
        return Err(RelaywireError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "write_vectored returned 0",
        )));
    }

    if written < total_size {
        // Partial write: flatten once and finish with write_all. Rare path,
        // the copy is acceptable.
        let mut flat = Vec::with_capacity(total_size);
        for message in batch {
            flat.extend_from_slice(&message.prefix);
            flat.extend_from_slice(&message.frame);
        }
        writer.write_all(&flat[written..]).await?;
    }

    writer.flush().await?;
    Ok(())
}
