//! Transfer and upload error types.

use std::fmt;
use std::io;
use thiserror::Error;

/// Where in an upload a failure happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStage {
    Negotiate,
    Read,
    Write,
    Finalize,
}

impl TransferStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negotiate => "negotiate",
            Self::Read => "read",
            Self::Write => "write",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from a single pipeline run.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer failed during {stage}: {source}")]
    Failed {
        stage: TransferStage,
        #[source]
        source: io::Error,
    },

    #[error("size violation: declared {expected} bytes, source produced {actual}")]
    SizeViolation { expected: u64, actual: u64 },

    #[error("transfer exceeded the {limit} byte limit")]
    LimitExceeded { limit: u64 },

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn read(source: io::Error) -> Self {
        Self::Failed {
            stage: TransferStage::Read,
            source,
        }
    }

    pub fn write(source: io::Error) -> Self {
        Self::Failed {
            stage: TransferStage::Write,
            source,
        }
    }

    /// Whether a fresh attempt with the same bytes could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Failed { source, .. } => is_transient_io(source),
            _ => false,
        }
    }
}

/// I/O error kinds worth retrying.
pub fn is_transient_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// Errors surfaced by the upload session manager.
///
/// A failed upload never yields an identifier.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid object size: {size} (must be between {min} and {max})")]
    InvalidSize { size: u64, min: u64, max: u64 },

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("payment not ready: {0}")]
    PaymentNotReady(String),

    #[error("no storage provider available ({tried} tried)")]
    NoProviderAvailable { tried: usize },

    #[error("transfer failed during {stage}: {source}")]
    TransferFailed {
        stage: TransferStage,
        #[source]
        source: io::Error,
    },

    #[error("size violation: declared {expected} bytes, source produced {actual}")]
    SizeViolation { expected: u64, actual: u64 },

    #[error("upload cancelled")]
    Cancelled,
}

impl UploadError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSize { .. } => "invalid_size",
            Self::InvalidMetadata(_) => "invalid_metadata",
            Self::PaymentNotReady(_) => "payment_not_ready",
            Self::NoProviderAvailable { .. } => "no_provider_available",
            Self::TransferFailed { .. } => "transfer_failed",
            Self::SizeViolation { .. } => "size_violation",
            Self::Cancelled => "cancelled",
        }
    }

    pub(crate) fn finalize(source: io::Error) -> Self {
        Self::TransferFailed {
            stage: TransferStage::Finalize,
            source,
        }
    }
}

impl From<depot_core::Error> for UploadError {
    fn from(err: depot_core::Error) -> Self {
        use depot_core::Error as Core;
        match err {
            Core::InvalidSize { size, min, max } => Self::InvalidSize { size, min, max },
            Core::InvalidMetadata(msg) => Self::InvalidMetadata(msg),
            Core::SizeViolation { expected, actual } => Self::SizeViolation { expected, actual },
            other => Self::finalize(io::Error::new(io::ErrorKind::InvalidData, other.to_string())),
        }
    }
}

impl From<TransferError> for UploadError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Failed { stage, source } => Self::TransferFailed { stage, source },
            TransferError::SizeViolation { expected, actual } => {
                Self::SizeViolation { expected, actual }
            }
            TransferError::LimitExceeded { limit } => Self::InvalidSize {
                size: limit.saturating_add(1),
                min: 0,
                max: limit,
            },
            TransferError::Cancelled => Self::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let reset = TransferError::write(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(reset.is_transient());

        let denied = TransferError::write(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!denied.is_transient());

        assert!(!TransferError::Cancelled.is_transient());
        assert!(
            !TransferError::SizeViolation {
                expected: 1,
                actual: 2
            }
            .is_transient()
        );
    }

    #[test]
    fn transfer_errors_map_to_upload_errors() {
        let err: UploadError = TransferError::read(io::Error::other("disk")).into();
        assert!(matches!(
            err,
            UploadError::TransferFailed {
                stage: TransferStage::Read,
                ..
            }
        ));
        assert_eq!(err.code(), "transfer_failed");

        let err: UploadError = TransferError::LimitExceeded { limit: 10 }.into();
        assert!(matches!(err, UploadError::InvalidSize { max: 10, .. }));

        let err: UploadError = TransferError::Cancelled.into();
        assert_eq!(err.code(), "cancelled");
    }

    #[test]
    fn display_names_stage() {
        let err = UploadError::TransferFailed {
            stage: TransferStage::Write,
            source: io::Error::other("boom"),
        };
        assert_eq!(err.to_string(), "transfer failed during write: boom");
    }
}
