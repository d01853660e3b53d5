//! In-process memory storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload, check_range};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use time::OffsetDateTime;

/// Slice size for streamed reads.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

type Objects = BTreeMap<String, (Bytes, OffsetDateTime)>;

/// Object store keeping everything in a shared map.
///
/// Cloning the backend shares the underlying objects.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<Mutex<Objects>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, Objects> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup(&self, key: &str) -> StorageResult<Bytes> {
        self.objects()
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

fn check_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|c| c == ".." || c == ".") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Split a buffer into stream items without copying.
fn slices(data: Bytes) -> ByteStream {
    let chunks: Vec<StorageResult<Bytes>> = (0..data.len())
        .step_by(STREAM_CHUNK_SIZE)
        .map(|offset| Ok(data.slice(offset..data.len().min(offset + STREAM_CHUNK_SIZE))))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        check_key(key)?;
        Ok(self.objects().contains_key(key))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        check_key(key)?;
        self.objects()
            .get(key)
            .map(|(data, modified)| ObjectMeta {
                size: data.len() as u64,
                last_modified: Some(*modified),
            })
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        check_key(key)?;
        self.lookup(key)
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<ByteStream> {
        check_key(key)?;
        let data = self.lookup(key)?;
        check_range(key, start, end, data.len() as u64)?;
        Ok(slices(data.slice(start as usize..end as usize)))
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        check_key(key)?;
        self.objects()
            .insert(key.to_string(), (data, OffsetDateTime::now_utc()));
        Ok(())
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        check_key(key)?;
        Ok(Box::new(MemoryUpload {
            backend: self.clone(),
            key: key.to_string(),
            buf: BytesMut::new(),
        }))
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        check_key(from)?;
        check_key(to)?;
        let mut objects = self.objects();
        let (data, _) = objects
            .remove(from)
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        objects.insert(to.to_string(), (data, OffsetDateTime::now_utc()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        check_key(key)?;
        self.objects()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        Ok(self
            .objects()
            .keys()
            .filter(|key| {
                key.strip_prefix(prefix)
                    .is_some_and(|rest| prefix.is_empty() || rest.is_empty() || rest.starts_with('/'))
            })
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Buffers writes and publishes the object on finish.
struct MemoryUpload {
    backend: MemoryBackend,
    key: String,
    buf: BytesMut,
}

#[async_trait]
impl StreamingUpload for MemoryUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.buf.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let len = self.buf.len() as u64;
        self.backend.put(&self.key, self.buf.freeze()).await?;
        Ok(len)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
