//! Prometheus metrics for the Depot server.
//!
//! Metrics live in a per-server [`Registry`] owned by [`Metrics`], so several
//! servers (or tests) in one process never collide on registration.
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! It exposes aggregate traffic only, no identifiers. Restrict it to scraper
//! addresses at the network level.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Server metrics.
pub struct Metrics {
    registry: Registry,

    pub uploads_completed: IntCounter,
    pub upload_errors: IntCounterVec,
    pub bytes_uploaded: IntCounter,
    pub upload_duration: Histogram,

    pub range_requests: IntCounterVec,
    pub bytes_served: IntCounter,
    pub active_retrievals: IntGauge,

    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub cache_bytes: IntGauge,
}

impl Metrics {
    /// Create and register all metrics in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let uploads_completed = IntCounter::new(
            "depot_uploads_completed_total",
            "Total number of uploads committed",
        )?;
        let upload_errors = IntCounterVec::new(
            Opts::new("depot_upload_errors_total", "Total upload failures by error code"),
            &["code"],
        )?;
        let bytes_uploaded = IntCounter::new(
            "depot_bytes_uploaded_total",
            "Total payload bytes committed",
        )?;
        let upload_duration = Histogram::with_opts(
            HistogramOpts::new(
                "depot_upload_duration_seconds",
                "Time from request to committed object",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        )?;

        let range_requests = IntCounterVec::new(
            Opts::new(
                "depot_retrievals_total",
                "Total retrieval requests by response status",
            ),
            &["status"],
        )?;
        let bytes_served = IntCounter::new(
            "depot_bytes_served_total",
            "Total payload bytes scheduled for retrieval responses",
        )?;
        let active_retrievals = IntGauge::new(
            "depot_active_retrievals",
            "Retrieval responses currently streaming",
        )?;

        let cache_hits = IntCounter::new("depot_cache_hits_total", "Object cache hits")?;
        let cache_misses = IntCounter::new("depot_cache_misses_total", "Object cache misses")?;
        let cache_bytes = IntGauge::new("depot_cache_bytes", "Bytes held by the object cache")?;

        registry.register(Box::new(uploads_completed.clone()))?;
        registry.register(Box::new(upload_errors.clone()))?;
        registry.register(Box::new(bytes_uploaded.clone()))?;
        registry.register(Box::new(upload_duration.clone()))?;
        registry.register(Box::new(range_requests.clone()))?;
        registry.register(Box::new(bytes_served.clone()))?;
        registry.register(Box::new(active_retrievals.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_bytes.clone()))?;

        Ok(Self {
            registry,
            uploads_completed,
            upload_errors,
            bytes_uploaded,
            upload_duration,
            range_requests,
            bytes_served,
            active_retrievals,
            cache_hits,
            cache_misses,
            cache_bytes,
        })
    }

    /// Record an upload failure by error code.
    pub fn record_upload_error(&self, code: &str) {
        self.upload_errors.with_label_values(&[code]).inc();
    }

    /// Record a retrieval response.
    pub fn record_retrieval(&self, status: StatusCode) {
        self.range_requests
            .with_label_values(&[status.as_str()])
            .inc();
    }

    /// Encode all metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
