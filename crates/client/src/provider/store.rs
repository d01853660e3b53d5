//! Provider writing directly into an object store.

use super::{DealTerms, StorageProvider, UploadSink};
use crate::pipeline::{ByteSink, WriteStatus};
use crate::sink::{self, ChannelSink};
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::ObjectRecord;
use depot_storage::{ObjectStore, StorageError, StreamingUpload};
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};
use uuid::Uuid;

/// Prefix for in-flight uploads.
pub const STAGING_PREFIX: &str = "staging/";

/// Stores objects in an [`ObjectStore`].
///
/// Uploads are streamed to `staging/<uuid>` by a writer task and renamed to
/// `pieces/<identifier>` on commit, after the object's record is written.
pub struct StoreProvider {
    name: String,
    store: Arc<dyn ObjectStore>,
    max_object_size: u64,
    supports_cdn: bool,
    channel_depth: usize,
}

impl StoreProvider {
    pub fn new(name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            name: name.into(),
            store,
            max_object_size: depot_core::MAX_OBJECT_SIZE,
            supports_cdn: false,
            channel_depth: 1,
        }
    }

    pub fn with_max_object_size(mut self, max: u64) -> Self {
        self.max_object_size = max;
        self
    }

    pub fn with_cdn(mut self, supported: bool) -> Self {
        self.supports_cdn = supported;
        self
    }

    /// Chunks buffered between the pipeline and the writer task.
    pub fn with_channel_depth(mut self, depth: usize) -> Self {
        self.channel_depth = depth.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

#[async_trait]
impl StorageProvider for StoreProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn negotiate(&self, terms: &DealTerms) -> io::Result<bool> {
        if terms.with_cdn && !self.supports_cdn {
            debug!(provider = %self.name, "declined: cdn not supported");
            return Ok(false);
        }
        if let Some(size) = terms.size
            && size > self.max_object_size
        {
            debug!(provider = %self.name, size, "declined: object too large");
            return Ok(false);
        }
        self.store.health_check().await?;
        Ok(true)
    }

    async fn open_upload(&self, _terms: &DealTerms) -> io::Result<Box<dyn UploadSink>> {
        let staging_key = format!("{STAGING_PREFIX}{}", Uuid::new_v4());
        let upload = self.store.put_stream(&staging_key).await?;
        let (sink, rx) = sink::channel(self.channel_depth);
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(write_staged(upload, rx, cancel.clone()));

        debug!(provider = %self.name, key = %staging_key, "staged upload opened");
        Ok(Box::new(StoreUpload {
            abort_on_drop: cancel.drop_guard(),
            sink,
            writer,
            store: Arc::clone(&self.store),
            staging_key,
        }))
    }
}

/// Drain the channel into the streaming upload.
async fn write_staged(
    mut upload: Box<dyn StreamingUpload>,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) -> io::Result<u64> {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                upload.abort().await?;
                return Err(io::Error::new(io::ErrorKind::Interrupted, "upload aborted"));
            }
            next = rx.recv() => next,
        };
        let Some(chunk) = next else { break };
        if let Err(e) = upload.write(chunk).await {
            if let Err(abort_err) = upload.abort().await {
                warn!(error = %abort_err, "failed to discard staged upload");
            }
            return Err(e.into());
        }
    }
    Ok(upload.finish().await?)
}

/// Dropping an upload without committing it discards the staged bytes.
struct StoreUpload {
    abort_on_drop: DropGuard,
    sink: ChannelSink,
    writer: JoinHandle<io::Result<u64>>,
    store: Arc<dyn ObjectStore>,
    staging_key: String,
}

impl StoreUpload {
    async fn discard(store: &dyn ObjectStore, key: &str) {
        match store.delete(key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => warn!(key, error = %e, "failed to delete staged object"),
        }
    }
}

#[async_trait]
impl ByteSink for StoreUpload {
    fn write_chunk(&mut self, chunk: Bytes) -> io::Result<WriteStatus> {
        self.sink.write_chunk(chunk)
    }

    async fn ready(&mut self) -> io::Result<()> {
        self.sink.ready().await
    }
}

#[async_trait]
impl UploadSink for StoreUpload {
    async fn commit(self: Box<Self>, record: &ObjectRecord) -> io::Result<()> {
        let Self {
            abort_on_drop,
            sink,
            writer,
            store,
            staging_key,
        } = *self;

        let _cancel = abort_on_drop.disarm();
        sink.close();
        let written = match writer.await {
            Ok(Ok(written)) => written,
            Ok(Err(e)) => {
                Self::discard(store.as_ref(), &staging_key).await;
                return Err(e);
            }
            Err(e) => {
                Self::discard(store.as_ref(), &staging_key).await;
                return Err(io::Error::other(e));
            }
        };
        if written != record.size {
            Self::discard(store.as_ref(), &staging_key).await;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("staged {written} bytes, record declares {}", record.size),
            ));
        }

        let record_key = record.identifier.record_key();
        let stored = match record.to_json() {
            Ok(json) => store.put(&record_key, Bytes::from(json)).await.map_err(io::Error::from),
            Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
        };
        if let Err(e) = stored {
            Self::discard(store.as_ref(), &staging_key).await;
            return Err(e);
        }

        let object_key = record.identifier.object_key();
        if let Err(e) = store.rename(&staging_key, &object_key).await {
            Self::discard(store.as_ref(), &record_key).await;
            Self::discard(store.as_ref(), &staging_key).await;
            return Err(e.into());
        }

        debug!(key = %object_key, size = written, "object committed");
        Ok(())
    }

    async fn abort(self: Box<Self>) {
        let Self {
            abort_on_drop,
            sink,
            writer,
            store,
            staging_key,
        } = *self;

        drop(abort_on_drop);
        drop(sink);
        if let Err(e) = writer.await {
            warn!(error = %e, "staged writer task failed");
        }
        Self::discard(store.as_ref(), &staging_key).await;
        debug!(key = %staging_key, "staged upload aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipeOptions, pipe};
    use crate::source::BytesSource;
    use depot_core::{ObjectMetadata, PieceCid};
    use depot_storage::{ByteStream, MemoryBackend, ObjectMeta, StorageResult};
    use time::OffsetDateTime;

    /// Memory store that refuses record writes and, optionally, fails the
    /// final step of streaming uploads after their bytes have landed.
    struct FailingStore {
        inner: MemoryBackend,
        fail_finish: bool,
    }

    impl FailingStore {
        fn refusing_records() -> Self {
            Self {
                inner: MemoryBackend::new(),
                fail_finish: false,
            }
        }

        fn failing_finish() -> Self {
            Self {
                inner: MemoryBackend::new(),
                fail_finish: true,
            }
        }
    }

    struct FailingFinish(Box<dyn StreamingUpload>);

    #[async_trait]
    impl StreamingUpload for FailingFinish {
        async fn write(&mut self, data: Bytes) -> StorageResult<()> {
            self.0.write(data).await
        }

        async fn finish(self: Box<Self>) -> StorageResult<u64> {
            self.0.finish().await?;
            Err(io::Error::from(io::ErrorKind::TimedOut).into())
        }

        async fn abort(self: Box<Self>) -> StorageResult<()> {
            self.0.abort().await
        }
    }

    #[async_trait]
    impl ObjectStore for FailingStore {
        async fn exists(&self, key: &str) -> StorageResult<bool> {
            self.inner.exists(key).await
        }

        async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
            self.inner.head(key).await
        }

        async fn get(&self, key: &str) -> StorageResult<Bytes> {
            self.inner.get(key).await
        }

        async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<ByteStream> {
            self.inner.get_range(key, start, end).await
        }

        async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
            if key.starts_with("records/") {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied).into());
            }
            self.inner.put(key, data).await
        }

        async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
            let upload = self.inner.put_stream(key).await?;
            if self.fail_finish {
                return Ok(Box::new(FailingFinish(upload)));
            }
            Ok(upload)
        }

        async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
            self.inner.rename(from, to).await
        }

        async fn delete(&self, key: &str) -> StorageResult<()> {
            self.inner.delete(key).await
        }

        async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
            self.inner.list(prefix).await
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    async fn stage(provider: &StoreProvider, data: &[u8]) -> Box<dyn UploadSink> {
        let mut sink = provider.open_upload(&DealTerms::default()).await.unwrap();
        pipe(
            &mut BytesSource::new(data.to_vec()),
            sink.as_mut(),
            &PipeOptions::new(1024),
        )
        .await
        .unwrap();
        sink
    }

    fn record(data: &[u8]) -> ObjectRecord {
        ObjectRecord {
            identifier: PieceCid::compute(data).unwrap(),
            size: data.len() as u64,
            metadata: ObjectMetadata::new(),
            with_cdn: false,
            provider: "local".to_string(),
            stored_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn negotiation_respects_limits() {
        let provider = StoreProvider::new("local", Arc::new(MemoryBackend::new()))
            .with_max_object_size(1000);

        let small = DealTerms {
            size: Some(500),
            ..Default::default()
        };
        assert!(provider.negotiate(&small).await.unwrap());

        let large = DealTerms {
            size: Some(1001),
            ..Default::default()
        };
        assert!(!provider.negotiate(&large).await.unwrap());

        let cdn = DealTerms {
            with_cdn: true,
            ..small.clone()
        };
        assert!(!provider.negotiate(&cdn).await.unwrap());
        assert!(provider.with_cdn(true).negotiate(&cdn).await.unwrap());
    }

    #[tokio::test]
    async fn commit_promotes_staged_bytes() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryBackend::new());
        let provider = StoreProvider::new("local", Arc::clone(&store));
        let data = vec![9u8; 300_000];
        let record = record(&data);

        let mut sink = provider.open_upload(&DealTerms::default()).await.unwrap();
        pipe(
            &mut BytesSource::new(data.clone()),
            sink.as_mut(),
            &PipeOptions::new(64 * 1024),
        )
        .await
        .unwrap();
        assert!(store.list(STAGING_PREFIX).await.unwrap().len() <= 1);
        assert!(!store.exists(&record.identifier.object_key()).await.unwrap());

        sink.commit(&record).await.unwrap();

        assert_eq!(
            store.get(&record.identifier.object_key()).await.unwrap(),
            Bytes::from(data)
        );
        let stored = store.get(&record.identifier.record_key()).await.unwrap();
        assert_eq!(ObjectRecord::from_json(&stored).unwrap().size, 300_000);
        assert!(store.list(STAGING_PREFIX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_rejects_short_staging() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryBackend::new());
        let provider = StoreProvider::new("local", Arc::clone(&store));
        let data = vec![1u8; 200];

        let mut sink = provider.open_upload(&DealTerms::default()).await.unwrap();
        pipe(
            &mut BytesSource::new(data[..100].to_vec()),
            sink.as_mut(),
            &PipeOptions::new(64),
        )
        .await
        .unwrap();

        let err = sink.commit(&record(&data)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn abort_leaves_nothing_behind() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryBackend::new());
        let provider = StoreProvider::new("local", Arc::clone(&store));

        let mut sink = provider.open_upload(&DealTerms::default()).await.unwrap();
        pipe(
            &mut BytesSource::new(vec![3u8; 5000]),
            sink.as_mut(),
            &PipeOptions::new(1000),
        )
        .await
        .unwrap();
        sink.abort().await;

        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_upload_is_discarded() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryBackend::new());
        let provider = StoreProvider::new("local", Arc::clone(&store));

        let mut sink = provider.open_upload(&DealTerms::default()).await.unwrap();
        pipe(
            &mut BytesSource::new(vec![3u8; 5000]),
            sink.as_mut(),
            &PipeOptions::new(1000),
        )
        .await
        .unwrap();
        drop(sink);

        // Give the writer task time to finish if it wrongly kept going.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_record_write_discards_staging() {
        let store: Arc<dyn ObjectStore> = Arc::new(FailingStore::refusing_records());
        let provider = StoreProvider::new("local", Arc::clone(&store));
        let data = vec![5u8; 4096];

        let sink = stage(&provider, &data).await;
        let err = sink.commit(&record(&data)).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(store.list(STAGING_PREFIX).await.unwrap().is_empty());
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_finish_discards_staging() {
        let store: Arc<dyn ObjectStore> = Arc::new(FailingStore::failing_finish());
        let provider = StoreProvider::new("local", Arc::clone(&store));
        let data = vec![6u8; 4096];

        let sink = stage(&provider, &data).await;
        let err = sink.commit(&record(&data)).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(store.list(STAGING_PREFIX).await.unwrap().is_empty());
        assert!(store.list("").await.unwrap().is_empty());
    }
}
