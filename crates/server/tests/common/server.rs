//! Server test utilities.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use depot_core::config::{AppConfig, StorageConfig};
use depot_core::PieceCid;
use depot_server::{AppState, Metrics, create_router};
use depot_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A collected response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// A test server over filesystem storage in a temporary directory.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a funded test server with default limits.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("storage");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let mut config = AppConfig {
            storage: StorageConfig::Filesystem { path: storage_path },
            ..AppConfig::for_testing()
        };
        modifier(&mut config);

        let metrics = Arc::new(Metrics::new().expect("Failed to create metrics"));
        let state = AppState::new(config, storage, metrics);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    pub fn storage(&self) -> Arc<dyn ObjectStore> {
        self.state.storage.clone()
    }

    /// Store an object directly, bypassing the upload endpoint.
    pub async fn seed_object(&self, data: &[u8]) -> PieceCid {
        let id = PieceCid::compute(data).expect("Failed to compute identifier");
        self.state
            .storage
            .put(&id.object_key(), Bytes::copy_from_slice(data))
            .await
            .expect("Failed to store object");
        id
    }

    /// Send a request and collect the whole response.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// GET an object, optionally with a `Range` header.
    pub async fn get_object(&self, id: &str, range: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(format!("/object/{id}"));
        if let Some(range) = range {
            builder = builder.header("Range", range);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// POST a raw body to the upload endpoint.
    pub async fn upload(&self, data: Bytes, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/object")
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", data.len());
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::from(data)).unwrap()).await
    }
}
