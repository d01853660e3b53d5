//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Object store abstraction for content-addressed storage.
///
/// Writes are atomic: a reader either sees the previous object or the
/// complete new one. Streaming uploads are invisible under their key until
/// `finish` succeeds.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Stream the bytes in `[start, end)` of an object.
    ///
    /// Each call owns its own read position, so concurrent range reads of
    /// the same object never interfere.
    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<ByteStream>;

    /// Put an object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Start a streaming upload.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Atomically move an object to a new key, replacing any existing object.
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List object keys with a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Get the name of this storage backend.
    ///
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// don't require connectivity verification.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding everything written.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Validate `[start, end)` against an object of `size` bytes.
pub(crate) fn check_range(key: &str, start: u64, end: u64, size: u64) -> StorageResult<()> {
    if end < start {
        return Err(crate::StorageError::InvalidRange(format!(
            "end ({end}) < start ({start})"
        )));
    }
    if end > size {
        return Err(crate::StorageError::InvalidRange(format!(
            "range end {end} exceeds size {size} of {key}"
        )));
    }
    Ok(())
}
