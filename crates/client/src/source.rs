//! Byte sources.

use crate::pipeline::ByteSource;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use depot_core::{PieceCid, PieceHasher};
use futures::{Stream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// In-memory source. Chunks are zero-copy slices of the buffer.
pub struct BytesSource {
    data: Bytes,
    offset: usize,
}

impl BytesSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            offset: 0,
        }
    }
}

#[async_trait]
impl ByteSource for BytesSource {
    async fn read_chunk(&mut self, max_len: usize) -> io::Result<Option<Bytes>> {
        if self.offset >= self.data.len() {
            return Ok(None);
        }
        let end = self.data.len().min(self.offset + max_len);
        let chunk = self.data.slice(self.offset..end);
        self.offset = end;
        Ok(Some(chunk))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    async fn rewind(&mut self) -> io::Result<bool> {
        self.offset = 0;
        Ok(true)
    }
}

/// Source reading a local file.
pub struct FileSource {
    file: File,
    path: PathBuf,
    size: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let size = file.metadata().await?.len();
        Ok(Self { file, path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn read_chunk(&mut self, max_len: usize) -> io::Result<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(max_len);
        while buf.len() < max_len {
            let n = (&mut self.file)
                .take((max_len - buf.len()) as u64)
                .read_buf(&mut buf)
                .await?;
            if n == 0 {
                break;
            }
        }
        Ok((!buf.is_empty()).then(|| buf.freeze()))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.size)
    }

    async fn rewind(&mut self) -> io::Result<bool> {
        self.file.seek(io::SeekFrom::Start(0)).await?;
        Ok(true)
    }
}

type BoxedByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Source over an arbitrary byte stream, re-chunked to the requested size.
///
/// Streams cannot be replayed, so a failed transfer from this source is
/// never retried.
pub struct StreamSource {
    stream: BoxedByteStream,
    leftover: Bytes,
    size_hint: Option<u64>,
}

impl StreamSource {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
            leftover: Bytes::new(),
            size_hint: None,
        }
    }

    pub fn with_size_hint(mut self, size: Option<u64>) -> Self {
        self.size_hint = size;
        self
    }
}

#[async_trait]
impl ByteSource for StreamSource {
    async fn read_chunk(&mut self, max_len: usize) -> io::Result<Option<Bytes>> {
        while self.leftover.is_empty() {
            match self.stream.next().await {
                Some(item) => self.leftover = item?,
                None => return Ok(None),
            }
        }
        let take = self.leftover.len().min(max_len);
        Ok(Some(self.leftover.split_to(take)))
    }

    fn size_hint(&self) -> Option<u64> {
        self.size_hint
    }
}

/// Wraps a source and hashes every byte that passes through it.
pub struct HashingSource<S> {
    inner: S,
    hasher: PieceHasher,
}

impl<S: ByteSource> HashingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            hasher: PieceHasher::new(),
        }
    }

    /// Bytes hashed since the last rewind.
    pub fn bytes_hashed(&self) -> u64 {
        self.hasher.bytes_hashed()
    }

    /// Finish hashing and return the identifier of everything read.
    pub fn finalize(self) -> depot_core::Result<PieceCid> {
        self.hasher.finalize()
    }
}

#[async_trait]
impl<S: ByteSource> ByteSource for HashingSource<S> {
    async fn read_chunk(&mut self, max_len: usize) -> io::Result<Option<Bytes>> {
        let chunk = self.inner.read_chunk(max_len).await?;
        if let Some(chunk) = &chunk {
            self.hasher.update(chunk);
        }
        Ok(chunk)
    }

    fn size_hint(&self) -> Option<u64> {
        self.inner.size_hint()
    }

    async fn rewind(&mut self) -> io::Result<bool> {
        if !self.inner.rewind().await? {
            return Ok(false);
        }
        self.hasher = PieceHasher::new();
        Ok(true)
    }
}
