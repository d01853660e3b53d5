//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/capabilities", get(handlers::get_capabilities))
        .route("/v1/health", get(handlers::health_check));

    let object_routes = Router::new()
        .route(
            "/object/{identifier}",
            get(handlers::get_object).head(handlers::head_object),
        )
        // The upload pipeline enforces the object size limit itself.
        .route(
            "/object",
            post(handlers::upload_object).layer(DefaultBodyLimit::disable()),
        );

    let mut router = Router::new().merge(api_routes).merge(object_routes);

    // Unauthenticated; restrict to Prometheus scrapers at the network level.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
