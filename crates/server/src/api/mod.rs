//! HTTP API
//!
//! Routes are mounted under `/api`; Prometheus metrics live at `/metrics`.

pub mod ask;
pub mod health;
pub mod metrics;
pub mod model;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, Request};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info_span;

/// Slack on top of the file limit for multipart framing
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.config.upload.max_file_bytes + MULTIPART_OVERHEAD;

    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
        )
    });

    let api_routes = Router::new()
        .route("/health", get(health::health))
        .route("/ask", post(ask::ask))
        .route(
            "/upload",
            post(upload::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/model", get(model::list_models))
        .route("/model/switch", post(model::switch_model));

    let mut app = Router::new().nest("/api", api_routes);
    if state.config.observability.enable_metrics {
        app = app.route("/metrics", get(metrics::metrics));
    }

    app.layer(trace_layer)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
