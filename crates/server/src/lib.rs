//! HTTP server for Depot.
//!
//! This crate provides:
//! - Streaming object uploads through the upload session manager
//! - Whole-object and byte-range retrieval
//! - An in-memory cache of hot objects
//! - Prometheus metrics

pub mod cache;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod proxy;
pub mod routes;
pub mod state;

pub use cache::ObjectCache;
pub use error::{ApiError, ApiResult};
pub use metrics::Metrics;
pub use proxy::{ProxyError, RangeProxy};
pub use routes::create_router;
pub use state::AppState;
