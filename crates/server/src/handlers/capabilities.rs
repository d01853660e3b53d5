//! Capability discovery and health endpoints.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use depot_core::api::{API_VERSION, Capabilities};
use serde::Serialize;

/// GET /v1/capabilities
pub async fn get_capabilities(State(state): State<AppState>) -> Json<Capabilities> {
    let transfer = &state.config.transfer;
    Json(Capabilities {
        api_version: API_VERSION.to_string(),
        chunk_size: transfer.chunk_size as u64,
        min_object_size: transfer.min_object_size,
        max_object_size: transfer.max_object_size,
        supports_cdn: true,
    })
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health
///
/// Unauthenticated, for load balancer and orchestrator health checks.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.storage.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}
