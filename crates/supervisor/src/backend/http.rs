//! Local inference server backend (llama-server `/completion` protocol)

use super::sse::{FrameEvent, SseFrameParser};
use super::{emit, BackendEvent, BackendHandle, BackendInvocation, InferenceBackend};
use crate::prompt::{truncate_to_bytes, Prompt};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use pdfask_common::config::ModelConfig;
use pdfask_common::{PdfAskError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone, Serialize)]
struct CompletionRequest {
    prompt: String,
    n_predict: u32,
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
    stop: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
}

/// Talks to a long-lived local inference server
#[derive(Debug, Clone)]
pub struct HttpServerBackend {
    client: reqwest::Client,
    channel_capacity: usize,
}

impl HttpServerBackend {
    pub fn new(channel_capacity: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| PdfAskError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            channel_capacity,
        })
    }
}

#[async_trait]
impl InferenceBackend for HttpServerBackend {
    async fn invoke(&self, prompt: &Prompt, model: &ModelConfig) -> Result<BackendInvocation> {
        let body = CompletionRequest {
            prompt: prompt.as_str().to_owned(),
            n_predict: model.sampling.max_tokens,
            temperature: model.sampling.temperature,
            top_p: model.sampling.top_p,
            repeat_penalty: model.sampling.repeat_penalty,
            stop: model.sampling.stop.clone(),
            stream: model.stream,
        };

        info!(
            "Requesting completion from {} for model {} ({} prompt bytes, stream={})",
            model.model_reference,
            model.id,
            prompt.len(),
            model.stream
        );

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive_request(
            self.client.clone(),
            model.model_reference.clone(),
            body,
            tx,
            cancel.clone(),
        ));

        Ok(BackendInvocation {
            events: rx,
            handle: BackendHandle::new(cancel, task),
        })
    }
}

async fn drive_request(
    client: reqwest::Client,
    url: String,
    body: CompletionRequest,
    tx: mpsc::Sender<BackendEvent>,
    cancel: CancellationToken,
) {
    let streaming = body.stream;
    let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        sent = client.post(&url).json(&body).send() => sent,
    };

    let response = match sent {
        Ok(response) => response,
        Err(e) => {
            let error = if e.is_connect() {
                PdfAskError::backend_spawn(format!("Cannot reach {}: {}", url, e))
            } else {
                PdfAskError::Http(e)
            };
            emit(&tx, &cancel, BackendEvent::Failed(error)).await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let error = PdfAskError::backend_exit(format!(
            "{} returned {}: {}",
            url,
            status,
            truncate_to_bytes(text.trim(), ERROR_BODY_LIMIT)
        ));
        emit(&tx, &cancel, BackendEvent::Failed(error)).await;
        return;
    }

    if streaming {
        relay_event_stream(response, &tx, &cancel).await;
    } else {
        relay_single_response(response, &tx, &cancel).await;
    }
}

async fn relay_event_stream(
    response: reqwest::Response,
    tx: &mpsc::Sender<BackendEvent>,
    cancel: &CancellationToken,
) {
    let mut body = response.bytes_stream();
    let mut parser = SseFrameParser::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = body.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                for frame in parser.push(&bytes) {
                    match frame {
                        FrameEvent::Content(text) => {
                            if !emit(tx, cancel, BackendEvent::Chunk(Bytes::from(text))).await {
                                return;
                            }
                        }
                        FrameEvent::Done => {
                            debug!("Completion stream signalled done");
                            emit(tx, cancel, BackendEvent::Finished).await;
                            return;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                let error = PdfAskError::backend_exit(format!("Stream interrupted: {}", e));
                emit(tx, cancel, BackendEvent::Failed(error)).await;
                return;
            }
            None => break,
        }
    }

    if let Some(FrameEvent::Content(text)) = parser.finish() {
        if !emit(tx, cancel, BackendEvent::Chunk(Bytes::from(text))).await {
            return;
        }
    }
    emit(tx, cancel, BackendEvent::Finished).await;
}

async fn relay_single_response(
    response: reqwest::Response,
    tx: &mpsc::Sender<BackendEvent>,
    cancel: &CancellationToken,
) {
    let bytes = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        bytes = response.bytes() => bytes,
    };

    let event = match bytes {
        Ok(bytes) => match serde_json::from_slice::<CompletionResponse>(&bytes) {
            Ok(parsed) => {
                if !parsed.content.is_empty()
                    && !emit(tx, cancel, BackendEvent::Chunk(Bytes::from(parsed.content))).await
                {
                    return;
                }
                BackendEvent::Finished
            }
            Err(e) => BackendEvent::Failed(PdfAskError::backend_exit(format!(
                "Malformed response: {}",
                e
            ))),
        },
        Err(e) => BackendEvent::Failed(PdfAskError::backend_exit(format!(
            "Failed reading response: {}",
            e
        ))),
    };

    emit(tx, cancel, event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptBuilder;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use pdfask_common::config::{PdfAskConfig, PromptConfig};
    use std::convert::Infallible;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/completion", addr)
    }

    fn model(url: String, stream: bool) -> ModelConfig {
        let mut model = PdfAskConfig::default().models.entries[1].clone();
        model.model_reference = url;
        model.stream = stream;
        model
    }

    fn prompt(model: &ModelConfig) -> Prompt {
        PromptBuilder::new(&PromptConfig::default()).build("What is the policy term?", None, model)
    }

    async fn collect(mut invocation: BackendInvocation) -> (String, Option<BackendEvent>) {
        let mut output = Vec::new();
        while let Some(event) = invocation.events.recv().await {
            match event {
                BackendEvent::Chunk(bytes) => output.extend_from_slice(&bytes),
                terminal => return (String::from_utf8(output).unwrap(), Some(terminal)),
            }
        }
        (String::from_utf8(output).unwrap(), None)
    }

    #[tokio::test]
    async fn test_streaming_skips_malformed_frames() {
        let router = Router::new().route(
            "/completion",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["stream"], true);
                assert_eq!(body["n_predict"], 200);
                let frames = vec![
                    "data: {\"content\":\"The term \"}\n\n",
                    "data: {not json}\n\n",
                    "data: {\"content\":\"is 12 \"}\n\ndata: {\"id\":1}\n\n",
                    "data: {\"content\":\"months.\",\"stop\":false}\n\n",
                    "data: {\"content\":\"\",\"stop\":true}\n\n",
                ];
                let stream = tokio_stream::iter(
                    frames.into_iter().map(|f| Ok::<_, Infallible>(f.to_string())),
                );
                Response::builder()
                    .header("content-type", "text/event-stream")
                    .body(Body::from_stream(stream))
                    .unwrap()
            }),
        );
        let model = model(serve(router).await, true);

        let backend = HttpServerBackend::new(8).unwrap();
        let invocation = backend.invoke(&prompt(&model), &model).await.unwrap();
        let (output, terminal) = collect(invocation).await;

        assert_eq!(output, "The term is 12 months.");
        assert!(matches!(terminal, Some(BackendEvent::Finished)));
    }

    #[tokio::test]
    async fn test_non_streaming_response() {
        let router = Router::new().route(
            "/completion",
            post(|| async { Json(serde_json::json!({"content": "Twelve months.", "tokens_predicted": 3})) }),
        );
        let model = model(serve(router).await, false);

        let backend = HttpServerBackend::new(8).unwrap();
        let invocation = backend.invoke(&prompt(&model), &model).await.unwrap();
        let (output, terminal) = collect(invocation).await;

        assert_eq!(output, "Twelve months.");
        assert!(matches!(terminal, Some(BackendEvent::Finished)));
    }

    #[tokio::test]
    async fn test_malformed_top_level_response() {
        let router = Router::new().route("/completion", post(|| async { "<html>oops</html>" }));
        let model = model(serve(router).await, false);

        let backend = HttpServerBackend::new(8).unwrap();
        let invocation = backend.invoke(&prompt(&model), &model).await.unwrap();
        let (output, terminal) = collect(invocation).await;

        assert!(output.is_empty());
        assert!(matches!(
            terminal,
            Some(BackendEvent::Failed(PdfAskError::BackendExit(_)))
        ));
    }

    #[tokio::test]
    async fn test_error_status() {
        let router = Router::new().route(
            "/completion",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "loading model").into_response() }),
        );
        let model = model(serve(router).await, true);

        let backend = HttpServerBackend::new(8).unwrap();
        let invocation = backend.invoke(&prompt(&model), &model).await.unwrap();
        let (_, terminal) = collect(invocation).await;

        match terminal {
            Some(BackendEvent::Failed(PdfAskError::BackendExit(msg))) => {
                assert!(msg.contains("503"), "{}", msg);
                assert!(msg.contains("loading model"), "{}", msg);
            }
            other => panic!("unexpected terminal event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terminate_stops_stalled_stream() {
        let router = Router::new().route(
            "/completion",
            post(|| async {
                let first = futures_util::stream::iter(vec![Ok::<_, Infallible>(
                    "data: {\"content\":\"partial\"}\n\n".to_string(),
                )]);
                let stream = first.chain(futures_util::stream::pending());
                Response::builder()
                    .header("content-type", "text/event-stream")
                    .body(Body::from_stream(stream))
                    .unwrap()
            }),
        );
        let model = model(serve(router).await, true);

        let backend = HttpServerBackend::new(8).unwrap();
        let mut invocation = backend.invoke(&prompt(&model), &model).await.unwrap();
        match invocation.events.recv().await {
            Some(BackendEvent::Chunk(bytes)) => assert_eq!(&bytes[..], b"partial"),
            other => panic!("unexpected event: {:?}", other),
        }

        let started = std::time::Instant::now();
        invocation.handle.terminate(Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        // No terminal event once terminated
        assert!(invocation.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_connection_refused_is_spawn_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let model = model(format!("http://{}/completion", addr), true);

        let backend = HttpServerBackend::new(8).unwrap();
        let invocation = backend.invoke(&prompt(&model), &model).await.unwrap();
        let (_, terminal) = collect(invocation).await;

        assert!(matches!(
            terminal,
            Some(BackendEvent::Failed(PdfAskError::BackendSpawn(_)))
        ));
    }
}
