//! Backpressure-aware byte pipeline.
//!
//! [`pipe`] pulls chunks from a [`ByteSource`] and offers them to a
//! [`ByteSink`]. A sink that cannot take more returns the chunk in
//! [`WriteStatus::WouldBlock`]; the pipeline then stops reading and waits on
//! [`ByteSink::ready`] before offering the same chunk again. At most one chunk
//! is ever held by the pipeline itself.

use crate::error::TransferError;
use crate::progress::{ProgressObserver, TransferProgress};
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::TransferSession;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Produces payload bytes in order.
#[async_trait]
pub trait ByteSource: Send {
    /// Read the next chunk of at most `max_len` bytes. `None` marks the end.
    async fn read_chunk(&mut self, max_len: usize) -> io::Result<Option<Bytes>>;

    /// Total bytes this source will produce, if known.
    fn size_hint(&self) -> Option<u64> {
        None
    }

    /// Restart from the first byte. Returns `false` if the source cannot be replayed.
    async fn rewind(&mut self) -> io::Result<bool> {
        Ok(false)
    }
}

#[async_trait]
impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    async fn read_chunk(&mut self, max_len: usize) -> io::Result<Option<Bytes>> {
        (**self).read_chunk(max_len).await
    }

    fn size_hint(&self) -> Option<u64> {
        (**self).size_hint()
    }

    async fn rewind(&mut self) -> io::Result<bool> {
        (**self).rewind().await
    }
}

/// Outcome of offering a chunk to a sink.
#[derive(Debug)]
pub enum WriteStatus {
    /// The sink took ownership of the chunk.
    Accepted,
    /// The sink is full; the chunk is handed back unchanged.
    WouldBlock(Bytes),
}

/// Consumes payload bytes in order.
#[async_trait]
pub trait ByteSink: Send {
    /// Offer a chunk without waiting.
    fn write_chunk(&mut self, chunk: Bytes) -> io::Result<WriteStatus>;

    /// Resolve once the sink can accept another chunk.
    async fn ready(&mut self) -> io::Result<()>;

    /// Push out anything buffered. Called once after the last chunk.
    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Options for one pipeline run.
#[derive(Clone)]
pub struct PipeOptions {
    pub chunk_size: usize,
    /// Declared total. Producing more or fewer bytes is a size violation.
    pub total: Option<u64>,
    /// Hard ceiling for sources of unknown size.
    pub limit: Option<u64>,
    pub cancel: CancellationToken,
    pub observer: Arc<dyn ProgressObserver>,
}

impl PipeOptions {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            total: None,
            limit: None,
            cancel: CancellationToken::new(),
            observer: crate::progress::noop(),
        }
    }

    pub fn with_total(mut self, total: Option<u64>) -> Self {
        self.total = total;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self::new(depot_core::DEFAULT_CHUNK_SIZE)
    }
}

/// Statistics of a completed run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes: u64,
    pub chunks: u64,
    /// Times the sink pushed back.
    pub stalls: u64,
    /// Largest chunk the pipeline held at once.
    pub max_chunk: usize,
    pub elapsed: Duration,
}

/// Move every byte from `source` into `sink`.
///
/// Cancellation is observed between chunks and while waiting on the sink.
/// Nothing is retried here; a failed run reports which side failed.
#[instrument(skip_all, fields(chunk_size = opts.chunk_size, total = ?opts.total))]
pub async fn pipe<S, K>(
    source: &mut S,
    sink: &mut K,
    opts: &PipeOptions,
) -> Result<TransferReport, TransferError>
where
    S: ByteSource + ?Sized,
    K: ByteSink + ?Sized,
{
    let chunk_size = opts.chunk_size.max(1);
    let started = Instant::now();
    let mut session = TransferSession::new(opts.total, chunk_size);
    let mut stalls = 0u64;
    let mut max_chunk = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = opts.cancel.cancelled() => return Err(TransferError::Cancelled),
            read = source.read_chunk(chunk_size) => read.map_err(TransferError::read)?,
        };
        let Some(chunk) = next else { break };
        if chunk.is_empty() {
            continue;
        }

        let len = chunk.len() as u64;
        if let Some(limit) = opts.limit
            && session.transferred + len > limit
        {
            session.fail();
            return Err(TransferError::LimitExceeded { limit });
        }
        session
            .record(len)
            .map_err(|_| TransferError::SizeViolation {
                expected: opts.total.unwrap_or_default(),
                actual: session.transferred + len,
            })?;
        max_chunk = max_chunk.max(chunk.len());

        let mut pending = chunk;
        loop {
            match sink.write_chunk(pending).map_err(TransferError::write)? {
                WriteStatus::Accepted => break,
                WriteStatus::WouldBlock(returned) => {
                    stalls += 1;
                    pending = returned;
                    tokio::select! {
                        biased;
                        _ = opts.cancel.cancelled() => return Err(TransferError::Cancelled),
                        ready = sink.ready() => ready.map_err(TransferError::write)?,
                    }
                }
            }
        }

        opts.observer.on_progress(&TransferProgress {
            transferred: session.transferred,
            total: opts.total,
            chunks: session.chunks,
        });
    }

    tokio::select! {
        biased;
        _ = opts.cancel.cancelled() => return Err(TransferError::Cancelled),
        flushed = sink.flush() => flushed.map_err(TransferError::write)?,
    }

    session
        .complete()
        .map_err(|_| TransferError::SizeViolation {
            expected: opts.total.unwrap_or_default(),
            actual: session.transferred,
        })?;

    debug!(
        session = %session.id,
        bytes = session.transferred,
        chunks = session.chunks,
        stalls,
        "pipeline finished"
    );

    Ok(TransferReport {
        bytes: session.transferred,
        chunks: session.chunks,
        stalls,
        max_chunk,
        elapsed: started.elapsed(),
    })
}
