//! Object upload and retrieval endpoints.

use crate::error::{ApiError, ApiResult};
use crate::proxy::{self, ProxyBody, Resolved};
use crate::state::AppState;
use async_trait::async_trait;
use axum::Json;
use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use depot_client::{ByteSource, StreamSource, UploadError, UploadOptions, UploadReceipt};
use depot_core::ObjectMetadata;
use depot_core::api::{META_HEADER_PREFIX, UploadResponse, WITH_CDN_HEADER};
use futures::{StreamExt, TryStreamExt};
use prometheus::IntGauge;
use std::io;
use tracing::{debug, info, warn};

/// Multipart field carrying the payload.
const DATA_FIELD: &str = "data";
/// Optional multipart field naming the uploaded file.
const FILENAME_FIELD: &str = "filename";
/// Metadata key the multipart filename is recorded under.
const FILENAME_KEY: &str = "filename";

fn range_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::RANGE)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

fn response_builder(resolved: &Resolved) -> axum::http::response::Builder {
    let mut builder = Response::builder()
        .status(resolved.status())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, resolved.content_length());
    if let Some(content_range) = resolved.content_range() {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }
    builder
}

/// Decrements the active retrieval gauge when the body is dropped.
struct ActiveRetrieval(IntGauge);

impl ActiveRetrieval {
    fn start(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for ActiveRetrieval {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// GET /object/{identifier}
pub async fn get_object(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let range = range_header(&headers);
    let result = serve_object(&state, &identifier, range.as_deref()).await;
    let status = match &result {
        Ok(response) => response.status(),
        Err(e) => e.status_code(),
    };
    state.metrics.record_retrieval(status);
    result
}

async fn serve_object(
    state: &AppState,
    identifier: &str,
    range: Option<&str>,
) -> ApiResult<Response> {
    let response = state.proxy.handle(identifier, range, &state.shutdown).await?;
    let resolved = response.resolved;
    state.metrics.bytes_served.inc_by(resolved.content_length());

    let body = match response.body {
        ProxyBody::Cached(bytes) => Body::from(bytes),
        ProxyBody::Stream(stream) => {
            let active = ActiveRetrieval::start(&state.metrics.active_retrievals);
            let id = resolved.identifier;
            let stream = proxy::cancellable(stream, state.shutdown.clone()).map(move |chunk| {
                let _active = &active;
                chunk.map_err(|e| {
                    warn!(identifier = %id, error = %e, "retrieval stream failed");
                    io::Error::from(e)
                })
            });
            Body::from_stream(stream)
        }
    };

    response_builder(&resolved)
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// HEAD /object/{identifier}
pub async fn head_object(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let range = range_header(&headers);
    let resolved = state.proxy.resolve(&identifier, range.as_deref()).await?;
    response_builder(&resolved)
        .body(Body::empty())
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Collect `X-Depot-Meta-*` headers into object metadata.
fn metadata_from_headers(headers: &HeaderMap) -> ApiResult<ObjectMetadata> {
    let mut metadata = ObjectMetadata::new();
    for (name, value) in headers {
        let Some(key) = name.as_str().strip_prefix(META_HEADER_PREFIX) else {
            continue;
        };
        let value = value
            .to_str()
            .map_err(|_| ApiError::BadRequest(format!("metadata header {name} is not text")))?;
        metadata
            .insert(key, value)
            .map_err(UploadError::from)?;
    }
    Ok(metadata)
}

fn with_cdn(headers: &HeaderMap) -> bool {
    headers
        .get(WITH_CDN_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn declared_length(headers: &HeaderMap) -> ApiResult<Option<u64>> {
    headers
        .get(header::CONTENT_LENGTH)
        .map(|v| {
            v.to_str()
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| ApiError::BadRequest("invalid Content-Length".to_string()))
        })
        .transpose()
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"))
}

/// Payload of a multipart `data` field.
struct FieldSource<'a> {
    field: Field<'a>,
    leftover: Bytes,
}

#[async_trait]
impl ByteSource for FieldSource<'_> {
    async fn read_chunk(&mut self, max_len: usize) -> io::Result<Option<Bytes>> {
        while self.leftover.is_empty() {
            match self.field.chunk().await {
                Ok(Some(chunk)) => self.leftover = chunk,
                Ok(None) => return Ok(None),
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e.body_text())),
            }
        }
        let take = self.leftover.len().min(max_len);
        Ok(Some(self.leftover.split_to(take)))
    }
}

/// POST /object
///
/// Accepts a raw body, or `multipart/form-data` with a `data` file field and
/// an optional `filename` field.
pub async fn upload_object(
    State(state): State<AppState>,
    request: Request,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let headers = request.headers().clone();
    let mut metadata = metadata_from_headers(&headers)?;
    let opts = UploadOptions::default()
        .with_cdn(with_cdn(&headers))
        .with_cancel(state.shutdown.child_token());

    let result = if is_multipart(&headers) {
        let mut multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        upload_multipart(&state, &mut multipart, &mut metadata, &opts).await
    } else {
        let declared = declared_length(&headers)?;
        let stream = request
            .into_body()
            .into_data_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::UnexpectedEof, e));
        let source = StreamSource::new(stream).with_size_hint(declared);
        state
            .uploads
            .upload(source, declared, metadata, &opts)
            .await
            .map_err(ApiError::from)
    };

    match result {
        Ok(receipt) => {
            record_upload(&state, &receipt);
            Ok((
                StatusCode::CREATED,
                Json(UploadResponse {
                    identifier: receipt.identifier,
                    size: receipt.size,
                }),
            ))
        }
        Err(e) => {
            state.metrics.record_upload_error(e.code());
            Err(e)
        }
    }
}

async fn upload_multipart(
    state: &AppState,
    multipart: &mut Multipart,
    metadata: &mut ObjectMetadata,
    opts: &UploadOptions,
) -> ApiResult<UploadReceipt> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        match field.name() {
            Some(FILENAME_FIELD) => {
                let filename = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                if metadata.get(FILENAME_KEY).is_none() {
                    metadata
                        .insert(FILENAME_KEY, filename)
                        .map_err(UploadError::from)?;
                }
            }
            Some(DATA_FIELD) => {
                let source = FieldSource {
                    field,
                    leftover: Bytes::new(),
                };
                let receipt = state
                    .uploads
                    .upload(source, None, metadata.clone(), opts)
                    .await?;
                return Ok(receipt);
            }
            other => debug!(field = ?other, "ignoring multipart field"),
        }
    }
    Err(ApiError::BadRequest(format!(
        "multipart upload has no `{DATA_FIELD}` field"
    )))
}

fn record_upload(state: &AppState, receipt: &UploadReceipt) {
    state.metrics.uploads_completed.inc();
    state.metrics.bytes_uploaded.inc_by(receipt.size);
    state
        .metrics
        .upload_duration
        .observe(receipt.elapsed.as_secs_f64());
    info!(
        identifier = %receipt.identifier,
        size = receipt.size,
        provider = %receipt.provider,
        "object stored"
    );
}
