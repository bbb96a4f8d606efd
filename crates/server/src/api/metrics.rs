//! Prometheus exposition

use axum::http::header;
use axum::response::IntoResponse;
use pdfask_common::METRICS;

pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        METRICS.gather(),
    )
}

#[cfg(test)]
mod tests {
    use crate::api::create_router;
    use crate::api::testing::{body_string, state, CannedBackend, FakeExtractor};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(state(
            dir.path(),
            Arc::new(CannedBackend::answering(vec![])),
            Arc::new(FakeExtractor::pages(1)),
        ));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("inference_sessions_total"));
    }
}
