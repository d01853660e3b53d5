use async_trait::async_trait;
use bytes::Bytes;
use depot_client::provider::{DealTerms, StorageProvider, UploadSink};
use depot_client::{ByteSink, WriteStatus};
use depot_core::ObjectRecord;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a mock provider answers negotiation.
#[derive(Clone, Copy, Debug)]
pub enum MockBehavior {
    Accept,
    Decline,
    Error,
    Hang,
}

#[derive(Default)]
struct Counters {
    negotiations: AtomicUsize,
    opens: AtomicUsize,
    aborts: AtomicUsize,
    /// Attempts left that fail after their first chunk.
    failing: AtomicUsize,
    committed: Mutex<Option<(ObjectRecord, Vec<u8>)>>,
}

/// Provider recording every call, with scripted failures.
pub struct MockProvider {
    name: String,
    behavior: MockBehavior,
    counters: Arc<Counters>,
}

impl MockProvider {
    pub fn new(name: &str, behavior: MockBehavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            counters: Arc::default(),
        }
    }

    /// Accepts, but the first `attempts` uploads break with a connection reset.
    pub fn flaky(name: &str, attempts: usize) -> Self {
        let provider = Self::new(name, MockBehavior::Accept);
        provider.counters.failing.store(attempts, Ordering::SeqCst);
        provider
    }

    pub fn negotiations(&self) -> usize {
        self.counters.negotiations.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.counters.aborts.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> Option<(ObjectRecord, Vec<u8>)> {
        self.counters.committed.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn negotiate(&self, _terms: &DealTerms) -> io::Result<bool> {
        self.counters.negotiations.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            MockBehavior::Accept => Ok(true),
            MockBehavior::Decline => Ok(false),
            MockBehavior::Error => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            MockBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(true)
            }
        }
    }

    async fn open_upload(&self, _terms: &DealTerms) -> io::Result<Box<dyn UploadSink>> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .counters
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Ok(Box::new(MockSink {
            counters: Arc::clone(&self.counters),
            buf: Vec::new(),
            fail,
        }))
    }
}

struct MockSink {
    counters: Arc<Counters>,
    buf: Vec<u8>,
    fail: bool,
}

#[async_trait]
impl ByteSink for MockSink {
    fn write_chunk(&mut self, chunk: Bytes) -> io::Result<WriteStatus> {
        if self.fail && !self.buf.is_empty() {
            return Err(io::Error::from(io::ErrorKind::ConnectionReset));
        }
        self.buf.extend_from_slice(&chunk);
        Ok(WriteStatus::Accepted)
    }

    async fn ready(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl UploadSink for MockSink {
    async fn commit(self: Box<Self>, record: &ObjectRecord) -> io::Result<()> {
        let Self { counters, buf, .. } = *self;
        *counters.committed.lock().unwrap() = Some((record.clone(), buf));
        Ok(())
    }

    async fn abort(self: Box<Self>) {
        self.counters.aborts.fetch_add(1, Ordering::SeqCst);
    }
}
