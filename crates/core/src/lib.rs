//! Core domain types and shared logic for Depot.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Piece identifiers and the incremental piece hasher
//! - Byte range requests
//! - Transfer sessions and upload phases
//! - Object metadata and records
//! - Layered configuration
//! - HTTP API wire types

pub mod api;
pub mod config;
pub mod error;
pub mod fr32;
pub mod hash;
pub mod metadata;
pub mod piece;
pub mod range;
pub mod session;

pub use error::{Error, Result};
pub use hash::PieceHasher;
pub use metadata::{ObjectMetadata, ObjectRecord};
pub use piece::PieceCid;
pub use range::ByteRange;
pub use session::{SessionId, TransferSession, TransferState, UploadPhase};

/// Default pipeline chunk size: 64 KiB
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Smallest accepted object: one Fr32 block.
pub const MIN_OBJECT_SIZE: u64 = 127;

/// Largest accepted object: 200 MiB
pub const MAX_OBJECT_SIZE: u64 = 200 * 1024 * 1024;
