//! Client side of Depot: streaming transfers and uploads.
//!
//! This crate provides:
//! - A backpressure-aware pipeline moving bytes from sources to sinks
//! - Upload sessions that check payment, negotiate with providers,
//!   stream, retry and commit
//! - Providers writing to a local object store or a remote Depot server

pub mod error;
pub mod payment;
pub mod pipeline;
pub mod progress;
pub mod provider;
pub mod retry;
pub mod sink;
pub mod source;
pub mod upload;

pub use error::{TransferError, TransferStage, UploadError};
pub use payment::{Approval, PaymentGate, PaymentRequirements, StaticPaymentGate};
pub use pipeline::{ByteSink, ByteSource, PipeOptions, TransferReport, WriteStatus, pipe};
pub use progress::{ProgressObserver, TransferProgress};
pub use provider::{DealTerms, HttpProvider, StorageProvider, StoreProvider, UploadSink};
pub use retry::RetryPolicy;
pub use sink::{ChannelSink, FileSink, WriterSink};
pub use source::{BytesSource, FileSource, HashingSource, StreamSource};
pub use upload::{UploadManager, UploadOptions, UploadReceipt};
