use anyhow::{Context, Result};
use depot_client::{ByteSink, PipeOptions, RetryPolicy, StreamSource, TransferError, pipe};
use depot_core::api::{Capabilities, ErrorResponse};
use futures::StreamExt;
use reqwest::{StatusCode, Url, header};
use serde::{Deserialize, de::DeserializeOwned};
use std::io;
use std::time::Duration;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Outcome of a download.
#[derive(Debug)]
pub struct DownloadSummary {
    pub status: StatusCode,
    pub bytes: u64,
    pub chunks: u64,
    pub elapsed: Duration,
    /// `Content-Range` of a partial response.
    pub content_range: Option<String>,
}

/// A failed request, kept apart so transient failures can be retried.
struct RequestFailure {
    error: anyhow::Error,
    retryable: bool,
}

impl RequestFailure {
    fn fatal(error: anyhow::Error) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

impl From<reqwest::Error> for RequestFailure {
    fn from(err: reqwest::Error) -> Self {
        let retryable = err.is_connect() || err.is_timeout();
        Self {
            error: err.into(),
            retryable,
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Turn an error response into a readable failure.
async fn error_from_response(response: reqwest::Response) -> RequestFailure {
    let status = response.status();
    let content_range = response
        .headers()
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    let message = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(error) => format!("{}: {}", error.error, error.message),
        Err(_) if status == StatusCode::RANGE_NOT_SATISFIABLE => format!(
            "range not satisfiable ({})",
            content_range.as_deref().unwrap_or("unknown size")
        ),
        Err(_) => body,
    };
    RequestFailure {
        error: anyhow::anyhow!("API error ({}): {}", status, message),
        retryable: is_retryable_status(status),
    }
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    /// Run `attempt` until it succeeds, fails permanently or runs out of retries.
    async fn with_retries<T, F, Fut>(&self, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, RequestFailure>>,
    {
        let mut n = 1;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(failure) if failure.retryable && self.retry.should_retry(n) => {
                    tracing::debug!(attempt = n, error = %failure.error, "retrying request");
                    tokio::time::sleep(self.retry.delay(n)).await;
                    n += 1;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        self.with_retries(|| {
            let request = self.http.get(url.clone());
            async move {
                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(error_from_response(response).await);
                }
                let body = response.text().await?;
                serde_json::from_str(&body).map_err(|e| RequestFailure::fatal(e.into()))
            }
        })
        .await
    }

    pub async fn capabilities(&self) -> Result<Capabilities> {
        self.get_json("/v1/capabilities").await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get_json("/v1/health").await
    }

    /// Stream an object, or a byte range of it, through the transfer
    /// pipeline into `sink`.
    ///
    /// Requests are retried only until the response headers arrive. The
    /// body must match its `Content-Length`; a short body is reported as
    /// truncated.
    pub async fn download<K>(
        &self,
        identifier: &str,
        range: Option<&str>,
        sink: &mut K,
        opts: &PipeOptions,
    ) -> Result<DownloadSummary>
    where
        K: ByteSink + ?Sized,
    {
        let url = self.url(&format!("/object/{identifier}"))?;
        let request = self.with_retries(|| {
            let mut request = self.http.get(url.clone());
            if let Some(range) = range {
                request = request.header(header::RANGE, range);
            }
            async move {
                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(error_from_response(response).await);
                }
                Ok(response)
            }
        });
        let response = tokio::select! {
            biased;
            _ = opts.cancel.cancelled() => return Err(TransferError::Cancelled.into()),
            response = request => response?,
        };

        let status = response.status();
        let content_range = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let expected = response.content_length();

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other));
        let mut source = StreamSource::new(body).with_size_hint(expected);
        let opts = opts.clone().with_total(expected);

        let report = match pipe(&mut source, sink, &opts).await {
            Ok(report) => report,
            Err(TransferError::SizeViolation { expected, actual }) => {
                anyhow::bail!("download truncated: expected {expected} bytes, got {actual}")
            }
            Err(TransferError::Cancelled) => return Err(TransferError::Cancelled.into()),
            Err(e) => return Err(anyhow::Error::new(e).context("download failed")),
        };

        Ok(DownloadSummary {
            status,
            bytes: report.bytes,
            chunks: report.chunks,
            elapsed: report.elapsed,
            content_range,
        })
    }
}
