//! Question answering endpoint

use crate::error::ApiError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pdfask_common::{ModelConfig, PdfAskError};
use pdfask_supervisor::{BufferSink, ChannelSink, InferenceRequest, SessionOutcome};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    #[serde(default)]
    pub question: String,

    /// Extracted document text, if any
    #[serde(default)]
    pub pdf_text: Option<String>,

    /// `false` waits for the whole answer and returns JSON
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub success: bool,
    pub answer: String,
}

pub async fn ask(
    State(state): State<AppState>,
    Json(body): Json<AskRequest>,
) -> Result<Response, ApiError> {
    let request = InferenceRequest::new(body.question, body.pdf_text)?;
    let model = state.registry.active();

    info!(
        session = %request.id,
        model = %model.id,
        "Question received ({} bytes, {} bytes of context)",
        request.question.len(),
        request.context.as_ref().map_or(0, String::len)
    );

    if body.stream {
        stream_answer(state, request, model)
    } else {
        buffered_answer(state, request, model).await
    }
}

/// Chunked `text/plain` response fed by a detached session task
fn stream_answer(
    state: AppState,
    request: InferenceRequest,
    model: ModelConfig,
) -> Result<Response, ApiError> {
    let (mut sink, rx) = ChannelSink::new(state.config.stream.channel_capacity);
    let cancel = state.shutdown.child_token();
    let supervisor = state.supervisor.clone();

    tokio::spawn(async move {
        supervisor.run(&request, &model, &mut sink, cancel).await;
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| ApiError::internal(e.to_string()))
}

async fn buffered_answer(
    state: AppState,
    request: InferenceRequest,
    model: ModelConfig,
) -> Result<Response, ApiError> {
    let mut sink = BufferSink::new();
    let outcome = state
        .supervisor
        .run(&request, &model, &mut sink, state.shutdown.child_token())
        .await;

    match outcome {
        SessionOutcome::Completed { .. } => Ok(Json(AskResponse {
            success: true,
            answer: sink.into_string().trim().to_string(),
        })
        .into_response()),
        SessionOutcome::TimedOut { .. } => Err(ApiError::new(
            StatusCode::GATEWAY_TIMEOUT,
            PdfAskError::Timeout(model.timeout().as_secs()).user_message(),
        )),
        SessionOutcome::Failed { error, .. } => Err(ApiError::internal(error.user_message())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::api::testing::{body_json, body_string, json_request, state, CannedBackend, FakeExtractor};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_streams_plain_text_answer() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(CannedBackend::answering(vec!["The term ", "is 12 months."]));
        let app = create_router(state(dir.path(), backend.clone(), Arc::new(FakeExtractor::pages(1))));

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/ask",
                json!({"question": "What is the term?", "pdfText": "Policy term: 12 months."}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()["x-accel-buffering"], "no");
        assert_eq!(body_string(response).await, "The term is 12 months.");

        let prompts = backend.prompts.lock().unwrap();
        assert_eq!(
            prompts[0],
            "Based on this content: Policy term 12 months.\n\nQuestion: What is the term?"
        );
    }

    #[tokio::test]
    async fn test_without_context_answer_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(CannedBackend::answering(vec!["  The policy", " term is\n", "12 months. \n"]));
        let app = create_router(state(dir.path(), backend.clone(), Arc::new(FakeExtractor::pages(1))));

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/ask",
                json!({"question": "What is the policy term?", "pdfText": ""}),
            ))
            .await
            .unwrap();

        assert_eq!(body_string(response).await, "  The policy term is\n12 months. \n");
        assert_eq!(
            backend.prompts.lock().unwrap().as_slice(),
            ["What is the policy term?".to_string()]
        );
    }

    #[tokio::test]
    async fn test_blank_question_rejected_before_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(CannedBackend::answering(vec!["unused"]));
        let app = create_router(state(dir.path(), backend.clone(), Arc::new(FakeExtractor::pages(1))));

        let response = app
            .oneshot(json_request("POST", "/api/ask", json!({"question": "   "})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, json!({"error": "Question is required"}));
        assert!(backend.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_reported_in_stream() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(CannedBackend::unavailable());
        let app = create_router(state(dir.path(), backend, Arc::new(FakeExtractor::pages(1))));

        let response = app
            .oneshot(json_request("POST", "/api/ask", json!({"question": "Hello?"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "ERROR: AI backend is unavailable");
    }

    #[tokio::test]
    async fn test_buffered_answer() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(CannedBackend::answering(vec![" Twelve", " months.\n"]));
        let app = create_router(state(dir.path(), backend, Arc::new(FakeExtractor::pages(1))));

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/ask",
                json!({"question": "What is the term?", "stream": false}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"success": true, "answer": "Twelve months."})
        );
    }

    #[tokio::test]
    async fn test_buffered_empty_answer_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(CannedBackend::answering(vec!["  "]));
        let app = create_router(state(dir.path(), backend, Arc::new(FakeExtractor::pages(1))));

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/ask",
                json!({"question": "What is the term?", "stream": false}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Failed to get answer from AI"})
        );
    }
}
