//! In-memory cache of hot objects.
//!
//! Payloads are immutable [`Bytes`] behind an [`Arc`]. Replacing or evicting
//! an entry only drops the cache's reference; a request that already holds
//! the entry keeps serving from it.

use bytes::Bytes;
use depot_core::PieceCid;
use depot_core::config::CacheConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// A cached object payload.
#[derive(Debug)]
pub struct CacheEntry {
    pub identifier: PieceCid,
    pub data: Bytes,
}

impl CacheEntry {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<PieceCid, Arc<CacheEntry>>,
    /// Insertion order, oldest first. May hold identifiers already removed.
    order: VecDeque<PieceCid>,
    bytes: u64,
}

/// Bounded insertion-order cache keyed by identifier.
pub struct ObjectCache {
    inner: Mutex<Inner>,
    enabled: bool,
    max_bytes: u64,
    max_object_bytes: u64,
}

impl ObjectCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            enabled: config.enabled && config.max_bytes > 0,
            max_bytes: config.max_bytes,
            max_object_bytes: config.max_object_bytes.min(config.max_bytes),
        }
    }

    pub fn disabled() -> Self {
        Self::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock is still safe to use.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether an object of `size` bytes would be admitted.
    pub fn admits(&self, size: u64) -> bool {
        self.enabled && size <= self.max_object_bytes
    }

    pub fn get(&self, identifier: &PieceCid) -> Option<Arc<CacheEntry>> {
        self.lock().entries.get(identifier).cloned()
    }

    /// Insert or replace an object, evicting the oldest entries to stay
    /// within the byte budget. Returns `None` if the object is not admitted.
    pub fn insert(&self, identifier: PieceCid, data: Bytes) -> Option<Arc<CacheEntry>> {
        let size = data.len() as u64;
        if !self.admits(size) {
            return None;
        }
        let entry = Arc::new(CacheEntry {
            identifier,
            data,
        });

        let mut inner = self.lock();
        match inner.entries.insert(identifier, Arc::clone(&entry)) {
            Some(previous) => inner.bytes -= previous.size(),
            None => inner.order.push_back(identifier),
        }
        inner.bytes += size;

        while inner.bytes > self.max_bytes {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.bytes -= evicted.size();
                debug!(identifier = %oldest, size = evicted.size(), "evicted cached object");
            }
        }
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently held by the cache.
    pub fn total_bytes(&self) -> u64 {
        self.lock().bytes
    }
}
