//! Byte-range retrieval of stored objects.
//!
//! Every request resolves its own range and opens its own ranged read, or
//! slices an immutable cached payload. Nothing about a request is shared with
//! another, so concurrent ranges of one object never interfere.

use crate::cache::{CacheEntry, ObjectCache};
use crate::metrics::Metrics;
use axum::http::StatusCode;
use bytes::Bytes;
use depot_core::{ByteRange, PieceCid};
use depot_storage::{ByteStream, ObjectStore, StorageError};
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retrieval failures.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("range not satisfiable for object of {size} bytes")]
    RangeNotSatisfiable { size: u64 },

    #[error("storage backend failed: {0}")]
    Upstream(#[source] StorageError),

    #[error("retrieval cancelled")]
    Cancelled,
}

impl From<StorageError> for ProxyError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::NotFound(key),
            other => Self::Upstream(other),
        }
    }
}

/// The part of an object a request will receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub identifier: PieceCid,
    pub size: u64,
    /// `None` for the whole object.
    pub range: Option<ByteRange>,
}

impl Resolved {
    pub fn status(&self) -> StatusCode {
        if self.range.is_some() {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        }
    }

    /// Bytes in the response body.
    pub fn content_length(&self) -> u64 {
        self.range.map_or(self.size, |r| r.len())
    }

    /// `Content-Range` value for a 206 response.
    pub fn content_range(&self) -> Option<String> {
        self.range.map(|r| r.content_range(self.size))
    }

    fn bounds(&self) -> (u64, u64) {
        self.range
            .map_or((0, self.size), |r| (r.start(), r.end_exclusive()))
    }
}

/// Response body source.
pub enum ProxyBody {
    Cached(Bytes),
    Stream(ByteStream),
}

/// A resolved retrieval ready to be written out.
pub struct ProxyResponse {
    pub resolved: Resolved,
    pub body: ProxyBody,
}

/// Serves whole objects and byte ranges out of an object store.
pub struct RangeProxy {
    store: Arc<dyn ObjectStore>,
    cache: Arc<ObjectCache>,
    metrics: Arc<Metrics>,
}

impl RangeProxy {
    pub fn new(store: Arc<dyn ObjectStore>, cache: Arc<ObjectCache>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            cache,
            metrics,
        }
    }

    /// Parse an identifier. Malformed identifiers are reported as not found.
    pub fn parse_identifier(identifier: &str) -> Result<PieceCid, ProxyError> {
        identifier.parse::<PieceCid>().map_err(|e| {
            debug!(identifier, error = %e, "malformed identifier");
            ProxyError::NotFound(identifier.to_string())
        })
    }

    /// Work out the status and bounds of a request without reading content.
    pub async fn resolve(
        &self,
        identifier: &str,
        range_header: Option<&str>,
    ) -> Result<Resolved, ProxyError> {
        let identifier = Self::parse_identifier(identifier)?;
        let size = match self.cache.get(&identifier) {
            Some(entry) => entry.size(),
            None => self.store.head(&identifier.object_key()).await?.size,
        };

        let range = match range_header {
            None => None,
            Some(header) => Some(
                ByteRange::parse(header, size)
                    .map_err(|_| ProxyError::RangeNotSatisfiable { size })?,
            ),
        };
        Ok(Resolved {
            identifier,
            size,
            range,
        })
    }

    /// Resolve a request and open its body.
    pub async fn handle(
        &self,
        identifier: &str,
        range_header: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ProxyResponse, ProxyError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProxyError::Cancelled),
            result = self.open(identifier, range_header) => result,
        }
    }

    async fn open(
        &self,
        identifier: &str,
        range_header: Option<&str>,
    ) -> Result<ProxyResponse, ProxyError> {
        let resolved = self.resolve(identifier, range_header).await?;
        let (start, end) = resolved.bounds();

        let entry = match self.cache.get(&resolved.identifier) {
            Some(entry) => {
                self.metrics.cache_hits.inc();
                Some(entry)
            }
            None => {
                self.metrics.cache_misses.inc();
                self.populate(&resolved).await?
            }
        };

        let body = match entry {
            Some(entry) => ProxyBody::Cached(slice(&entry, start, end)?),
            None => {
                let stream = self
                    .store
                    .get_range(&resolved.identifier.object_key(), start, end)
                    .await?;
                ProxyBody::Stream(stream)
            }
        };

        debug!(
            identifier = %resolved.identifier,
            start,
            end,
            cached = matches!(body, ProxyBody::Cached(_)),
            "serving object"
        );
        Ok(ProxyResponse { resolved, body })
    }

    /// Load an admissible object into the cache.
    async fn populate(&self, resolved: &Resolved) -> Result<Option<Arc<CacheEntry>>, ProxyError> {
        if !self.cache.admits(resolved.size) {
            return Ok(None);
        }
        let data = self.store.get(&resolved.identifier.object_key()).await?;
        if data.len() as u64 != resolved.size {
            // Replaced between head and get; serve it uncached.
            warn!(identifier = %resolved.identifier, "object changed during retrieval");
            return Ok(None);
        }
        let entry = self.cache.insert(resolved.identifier, data);
        self.metrics.cache_bytes.set(self.cache.total_bytes() as i64);
        Ok(entry)
    }
}

fn slice(entry: &CacheEntry, start: u64, end: u64) -> Result<Bytes, ProxyError> {
    if end > entry.size() {
        return Err(ProxyError::RangeNotSatisfiable { size: entry.size() });
    }
    Ok(entry.data.slice(start as usize..end as usize))
}

/// Stop a body stream once `cancel` fires.
pub fn cancellable(stream: ByteStream, cancel: CancellationToken) -> ByteStream {
    Box::pin(stream.take_until(cancel.cancelled_owned()))
}
