//! HTTP API request and response types shared by server and clients.

use crate::PieceCid;
use serde::{Deserialize, Serialize};

/// Current API version string.
pub const API_VERSION: &str = "v1";

/// Header prefix carrying object metadata on uploads, e.g. `X-Depot-Meta-Owner`.
pub const META_HEADER_PREFIX: &str = "x-depot-meta-";

/// Header requesting CDN-backed storage for an upload.
pub const WITH_CDN_HEADER: &str = "x-depot-with-cdn";

/// Response from `GET /v1/capabilities`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub api_version: String,
    /// Chunk size the server streams with.
    pub chunk_size: u64,
    pub min_object_size: u64,
    pub max_object_size: u64,
    /// Whether the server accepts uploads with CDN retrieval enabled.
    #[serde(default)]
    pub supports_cdn: bool,
}

/// Response from a successful `POST /object`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub identifier: PieceCid,
    pub size: u64,
}

/// JSON error body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code.
    pub error: String,
    pub message: String,
    /// Suggested wait before retrying, when the failure is temporary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}
