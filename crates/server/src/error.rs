//! API error types.

use crate::proxy::ProxyError;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use depot_client::UploadError;
use depot_core::api::ErrorResponse;

/// Seconds a client should wait before retrying when no provider is available.
pub const NO_PROVIDER_RETRY_SECS: u64 = 5;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("range not satisfiable for object of {size} bytes")]
    RangeNotSatisfiable { size: u64 },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("storage error: {0}")]
    Storage(#[from] depot_storage::StorageError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::RangeNotSatisfiable { .. } => "range_not_satisfiable",
            Self::Upstream(_) => "upstream_error",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal_error",
            Self::Upload(e) => e.code(),
            Self::Storage(_) => "storage_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Cancelled => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upload(e) => match e {
                UploadError::InvalidSize { size, min, .. } if size < min => {
                    StatusCode::BAD_REQUEST
                }
                UploadError::InvalidSize { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                UploadError::InvalidMetadata(_) => StatusCode::BAD_REQUEST,
                UploadError::PaymentNotReady(_) => StatusCode::PAYMENT_REQUIRED,
                UploadError::NoProviderAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                UploadError::TransferFailed { .. } => StatusCode::BAD_GATEWAY,
                UploadError::SizeViolation { .. } => StatusCode::BAD_REQUEST,
                UploadError::Cancelled => StatusCode::BAD_REQUEST,
            },
            Self::Storage(e) => match e {
                depot_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Seconds the client should wait before retrying, if retrying can help.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Upload(UploadError::NoProviderAvailable { .. }) => Some(NO_PROVIDER_RETRY_SECS),
            _ => None,
        }
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::NotFound(id) => Self::NotFound(id),
            ProxyError::RangeNotSatisfiable { size } => Self::RangeNotSatisfiable { size },
            ProxyError::Upstream(e) => {
                tracing::error!(error = %e, "object store failed during retrieval");
                Self::Upstream(e.to_string())
            }
            ProxyError::Cancelled => Self::Cancelled,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after();

        // A 416 carries the object size and no body.
        if let Self::RangeNotSatisfiable { size } = self {
            let mut response = status.into_response();
            if let Ok(value) = HeaderValue::from_str(&depot_core::range::unsatisfied_content_range(size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            return response;
        }

        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
            retry_after_secs: retry_after,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
