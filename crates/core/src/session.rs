//! Transfer sessions and upload lifecycle phases.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for a transfer or upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transfer session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Created but no bytes moved yet.
    Pending,
    /// At least one chunk has been moved.
    InProgress,
    /// All bytes delivered.
    Complete,
    /// Stopped by an error or cancellation.
    Failed,
}

impl TransferState {
    /// Check if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Progress bookkeeping for one pipeline run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferSession {
    pub id: SessionId,
    /// Total payload size, when known up front.
    pub total: Option<u64>,
    /// Bytes moved so far. Only ever grows.
    pub transferred: u64,
    pub chunk_size: usize,
    pub chunks: u64,
    pub state: TransferState,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
}

impl TransferSession {
    /// Create a new pending session.
    pub fn new(total: Option<u64>, chunk_size: usize) -> Self {
        Self {
            id: SessionId::new(),
            total,
            transferred: 0,
            chunk_size,
            chunks: 0,
            state: TransferState::Pending,
            started_at: OffsetDateTime::now_utc(),
        }
    }

    /// Record a delivered chunk of `len` bytes.
    ///
    /// Fails with `SizeViolation` when the chunk would carry the session past
    /// its declared total; the counters are left untouched in that case.
    pub fn record(&mut self, len: u64) -> Result<u64> {
        let next = self.transferred.saturating_add(len);
        if let Some(total) = self.total
            && next > total
        {
            return Err(Error::SizeViolation {
                expected: total,
                actual: next,
            });
        }
        self.transferred = next;
        self.chunks += 1;
        self.state = TransferState::InProgress;
        Ok(next)
    }

    /// Mark the session complete, checking the declared total if any.
    pub fn complete(&mut self) -> Result<()> {
        if let Some(total) = self.total
            && self.transferred != total
        {
            self.state = TransferState::Failed;
            return Err(Error::SizeViolation {
                expected: total,
                actual: self.transferred,
            });
        }
        self.state = TransferState::Complete;
        Ok(())
    }

    /// Mark the session failed.
    pub fn fail(&mut self) {
        self.state = TransferState::Failed;
    }

    /// Elapsed wall time since the session started.
    pub fn elapsed(&self) -> time::Duration {
        OffsetDateTime::now_utc() - self.started_at
    }
}

/// Lifecycle phase of an upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum UploadPhase {
    Created,
    Negotiating,
    Transferring,
    Finalizing,
    Complete,
    Failed { reason: String },
}

impl UploadPhase {
    /// Stable lowercase name for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Negotiating => "negotiating",
            Self::Transferring => "transferring",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
            Self::Failed { .. } => "failed",
        }
    }

    /// Check if the upload reached a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed { .. })
    }

    /// Whether moving from this phase to `next` is a legal transition.
    ///
    /// Transferring may be re-entered from itself when a transfer is retried.
    pub fn can_transition_to(&self, next: &UploadPhase) -> bool {
        use UploadPhase::*;
        match (self, next) {
            (Created, Negotiating)
            | (Negotiating, Transferring)
            | (Transferring, Transferring)
            | (Transferring, Finalizing)
            | (Finalizing, Complete) => true,
            (from, Failed { .. }) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}
