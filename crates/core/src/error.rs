//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid object size: {size} (must be between {min} and {max})")]
    InvalidSize { size: u64, min: u64, max: u64 },

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("range not satisfiable: {header:?} for object of {size} bytes")]
    RangeNotSatisfiable { header: String, size: u64 },

    #[error("size violation: expected {expected} bytes, got {actual}")]
    SizeViolation { expected: u64, actual: u64 },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
