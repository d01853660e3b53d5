//! Provider backed by a remote Depot server.

use super::{DealTerms, StorageProvider, UploadSink};
use crate::pipeline::{ByteSink, WriteStatus};
use crate::sink::{self, ChannelSink};
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::ObjectRecord;
use depot_core::api::{Capabilities, ErrorResponse, META_HEADER_PREFIX, UploadResponse, WITH_CDN_HEADER};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::io;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;
use url::Url;

/// Streams uploads to `POST /object` on a Depot server.
///
/// The server computes the identifier independently; commit fails unless it
/// matches the one computed locally.
pub struct HttpProvider {
    name: String,
    http: reqwest::Client,
    base_url: Url,
    channel_depth: usize,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, base_url: Url) -> Self {
        Self {
            name: name.into(),
            http: reqwest::Client::new(),
            base_url,
            channel_depth: 1,
        }
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_channel_depth(mut self, depth: usize) -> Self {
        self.channel_depth = depth.max(1);
        self
    }

    fn url(&self, path: &str) -> io::Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    /// Fetch the server's advertised limits.
    pub async fn capabilities(&self) -> io::Result<Capabilities> {
        let response = self
            .http
            .get(self.url("/v1/capabilities")?)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        response.json().await.map_err(request_error)
    }
}

fn upload_headers(terms: &DealTerms) -> io::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    for (key, value) in terms.metadata.iter() {
        let name = HeaderName::try_from(format!("{META_HEADER_PREFIX}{key}"))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        headers.insert(name, value);
    }
    if terms.with_cdn {
        headers.insert(
            HeaderName::from_static(WITH_CDN_HEADER),
            HeaderValue::from_static("true"),
        );
    }
    Ok(headers)
}

/// Map a transport failure, keeping connection problems retryable.
fn request_error(err: reqwest::Error) -> io::Error {
    let kind = if err.is_timeout() {
        io::ErrorKind::TimedOut
    } else if err.is_connect() {
        io::ErrorKind::ConnectionRefused
    } else if err.is_decode() {
        io::ErrorKind::InvalidData
    } else {
        io::ErrorKind::ConnectionAborted
    };
    io::Error::new(kind, err)
}

/// Map an error response. Overload and gateway failures stay retryable.
fn status_error(status: StatusCode, body: &str) -> io::Error {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.to_string());
    let kind = match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => io::ErrorKind::TimedOut,
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE => io::ErrorKind::ConnectionAborted,
        s if s.is_client_error() => io::ErrorKind::InvalidInput,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, format!("server returned {status}: {message}"))
}

#[async_trait]
impl StorageProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn negotiate(&self, terms: &DealTerms) -> io::Result<bool> {
        let caps = self.capabilities().await?;
        if terms.with_cdn && !caps.supports_cdn {
            debug!(provider = %self.name, "declined: cdn not supported");
            return Ok(false);
        }
        if let Some(size) = terms.size
            && (size < caps.min_object_size || size > caps.max_object_size)
        {
            debug!(provider = %self.name, size, "declined: size outside server limits");
            return Ok(false);
        }
        Ok(true)
    }

    async fn open_upload(&self, terms: &DealTerms) -> io::Result<Box<dyn UploadSink>> {
        let url = self.url("/object")?;
        let headers = upload_headers(terms)?;
        let (sink, rx) = sink::channel(self.channel_depth);
        let cancel = CancellationToken::new();
        let request = self
            .http
            .post(url)
            .headers(headers)
            .body(body_from(rx, cancel.clone()));

        let task = tokio::spawn(async move {
            let response = request.send().await.map_err(request_error)?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(status_error(status, &body));
            }
            response.json::<UploadResponse>().await.map_err(request_error)
        });

        debug!(provider = %self.name, "remote upload opened");
        Ok(Box::new(HttpUpload {
            abort_on_drop: cancel.drop_guard(),
            sink,
            task: Some(task),
        }))
    }
}

/// Request body fed by the upload's channel.
///
/// A closed channel ends the body only if the upload was committed;
/// otherwise the body fails so the server never sees a truncated object as
/// complete.
fn body_from(rx: mpsc::Receiver<Bytes>, cancel: CancellationToken) -> reqwest::Body {
    let stream = futures::stream::unfold(Some(rx), move |rx| {
        let cancel = cancel.clone();
        async move {
            let mut rx = rx?;
            match rx.recv().await {
                Some(chunk) => Some((Ok(chunk), Some(rx))),
                None if cancel.is_cancelled() => Some((
                    Err(io::Error::new(io::ErrorKind::Interrupted, "upload abandoned")),
                    None,
                )),
                None => None,
            }
        }
    });
    reqwest::Body::wrap_stream(stream)
}

/// Dropping an upload without committing it fails the request body.
struct HttpUpload {
    abort_on_drop: DropGuard,
    sink: ChannelSink,
    task: Option<JoinHandle<io::Result<UploadResponse>>>,
}

impl HttpUpload {
    /// The request ended before the body did. Surface the server's answer.
    async fn early_response(&mut self) -> io::Error {
        let Some(task) = self.task.take() else {
            return io::Error::new(io::ErrorKind::BrokenPipe, "request already finished");
        };
        match task.await {
            Ok(Err(e)) => e,
            Ok(Ok(_)) => io::Error::new(
                io::ErrorKind::InvalidData,
                "server answered before the body was complete",
            ),
            Err(e) => io::Error::other(e),
        }
    }
}

#[async_trait]
impl ByteSink for HttpUpload {
    fn write_chunk(&mut self, chunk: Bytes) -> io::Result<WriteStatus> {
        // Hand the chunk back so `ready` can report why the request ended.
        if self.sink.is_closed() {
            return Ok(WriteStatus::WouldBlock(chunk));
        }
        self.sink.write_chunk(chunk)
    }

    async fn ready(&mut self) -> io::Result<()> {
        if self.sink.is_closed() {
            return Err(self.early_response().await);
        }
        match self.sink.ready().await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.early_response().await),
        }
    }
}

#[async_trait]
impl UploadSink for HttpUpload {
    async fn commit(self: Box<Self>, record: &ObjectRecord) -> io::Result<()> {
        let Self {
            abort_on_drop,
            sink,
            task,
        } = *self;
        let _cancel = abort_on_drop.disarm();
        let Some(task) = task else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "request already finished"));
        };
        sink.close();
        let response = task.await.map_err(io::Error::other)??;

        if response.identifier != record.identifier || response.size != record.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "server stored {} ({} bytes), expected {} ({} bytes)",
                    response.identifier, response.size, record.identifier, record.size
                ),
            ));
        }
        debug!(identifier = %response.identifier, "remote upload committed");
        Ok(())
    }

    async fn abort(mut self: Box<Self>) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        debug!("remote upload aborted");
    }
}
