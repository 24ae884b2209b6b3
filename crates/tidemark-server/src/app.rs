use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{delete, get},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Slack for multipart boundaries and the small text fields next to the file.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    if parsed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware is applied in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `CorsLayer`: configured origins, or any origin when none are set.
/// 2. `TraceLayer`: structured request/response logging via `tracing`.
///
/// The upload route carries its own body limit sized from the import config.
pub fn build_app(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.import.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;
    Router::new()
        .route("/health", get(routes::health::health))
        .route(
            "/api/sites/{site_id}/imports",
            get(routes::imports::list_imports).post(routes::imports::upload_import),
        )
        .route(
            "/api/sites/{site_id}/imports/{import_id}",
            delete(routes::imports::delete_import),
        )
        .route("/api/imports/{import_id}", get(routes::imports::get_import))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
