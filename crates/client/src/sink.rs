//! Byte sinks.

use crate::pipeline::{ByteSink, WriteStatus};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Collects everything in memory. Never pushes back.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemorySink {
    buf: bytes::BytesMut,
}

#[cfg(test)]
impl MemorySink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contents(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }
}

#[cfg(test)]
#[async_trait]
impl ByteSink for MemorySink {
    fn write_chunk(&mut self, chunk: Bytes) -> io::Result<WriteStatus> {
        self.buf.extend_from_slice(&chunk);
        Ok(WriteStatus::Accepted)
    }

    async fn ready(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes to any async writer, holding at most one chunk in flight.
pub struct WriterSink<W> {
    writer: W,
    pending: Option<Bytes>,
}

/// Sink over a local file.
pub type FileSink = WriterSink<File>;

impl FileSink {
    pub async fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::create(path).await?))
    }
}

impl<W> WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pending: None,
        }
    }

    /// Give back the writer. Call after a successful flush.
    pub fn into_inner(self) -> W {
        self.writer
    }

    async fn drain(&mut self) -> io::Result<()> {
        if let Some(chunk) = self.pending.take() {
            self.writer.write_all(&chunk).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<W> ByteSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn write_chunk(&mut self, chunk: Bytes) -> io::Result<WriteStatus> {
        if self.pending.is_some() {
            return Ok(WriteStatus::WouldBlock(chunk));
        }
        self.pending = Some(chunk);
        Ok(WriteStatus::Accepted)
    }

    async fn ready(&mut self) -> io::Result<()> {
        self.drain().await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.drain().await?;
        self.writer.flush().await
    }
}

/// Sink feeding a bounded channel.
///
/// The channel depth is the sink's buffer: once it is full, chunks are handed
/// back until the receiver makes room.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

/// Create a sink and the receiving end of its channel.
pub fn channel(depth: usize) -> (ChannelSink, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (ChannelSink { tx }, rx)
}

impl ChannelSink {
    /// Whether the receiver has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Close the channel so the receiver sees the end of the data.
    pub fn close(self) {
        drop(self.tx);
    }
}

fn receiver_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "receiver stopped")
}

#[async_trait]
impl ByteSink for ChannelSink {
    fn write_chunk(&mut self, chunk: Bytes) -> io::Result<WriteStatus> {
        match self.tx.try_send(chunk) {
            Ok(()) => Ok(WriteStatus::Accepted),
            Err(mpsc::error::TrySendError::Full(chunk)) => Ok(WriteStatus::WouldBlock(chunk)),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(receiver_gone()),
        }
    }

    async fn ready(&mut self) -> io::Result<()> {
        // Releasing the permit leaves the slot free for the next try_send;
        // this sink is the channel's only sender.
        self.tx.reserve().await.map(drop).map_err(|_| receiver_gone())
    }
}
