//! Storage providers.
//!
//! A provider first negotiates a deal for the object, then hands out an
//! [`UploadSink`] the pipeline streams into. Bytes written to a sink stay
//! invisible to readers until [`UploadSink::commit`] succeeds.

pub mod http;
pub mod store;

pub use http::HttpProvider;
pub use store::StoreProvider;

use crate::pipeline::ByteSink;
use async_trait::async_trait;
use depot_core::{ObjectMetadata, ObjectRecord};
use std::io;

/// What the uploader asks of a provider.
#[derive(Clone, Debug, Default)]
pub struct DealTerms {
    /// Object size, when known before the transfer.
    pub size: Option<u64>,
    pub metadata: ObjectMetadata,
    pub with_cdn: bool,
}

/// A place objects can be stored.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Name used in receipts, records and logs.
    fn name(&self) -> &str;

    /// Ask whether the provider will take an object under `terms`.
    ///
    /// `Ok(false)` is a refusal; errors mean the provider could not be asked.
    async fn negotiate(&self, terms: &DealTerms) -> io::Result<bool>;

    /// Open a staged upload for a negotiated deal.
    async fn open_upload(&self, terms: &DealTerms) -> io::Result<Box<dyn UploadSink>>;
}

/// Sink for one staged upload.
#[async_trait]
pub trait UploadSink: ByteSink {
    /// Promote the staged bytes under the record's identifier.
    async fn commit(self: Box<Self>, record: &ObjectRecord) -> io::Result<()>;

    /// Discard the staged bytes. Never fails; cleanup errors are logged.
    async fn abort(self: Box<Self>);
}
