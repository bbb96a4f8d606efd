//! Fakes shared by the handler tests

use crate::extract::{DocumentExtractor, ExtractedDocument};
use crate::state::AppState;
use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http_body_util::BodyExt;
use pdfask_common::{ModelConfig, PdfAskConfig, PdfAskError, Result};
use pdfask_supervisor::{BackendEvent, BackendHandle, BackendInvocation, InferenceBackend, Prompt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Backend that answers with fixed chunks, or fails to start
pub struct CannedBackend {
    chunks: Vec<&'static str>,
    unavailable: bool,
    pub prompts: Mutex<Vec<String>>,
}

impl CannedBackend {
    pub fn answering(chunks: Vec<&'static str>) -> Self {
        Self {
            chunks,
            unavailable: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::answering(vec![])
        }
    }
}

#[async_trait]
impl InferenceBackend for CannedBackend {
    async fn invoke(&self, prompt: &Prompt, _model: &ModelConfig) -> Result<BackendInvocation> {
        self.prompts.lock().unwrap().push(prompt.as_str().to_owned());
        if self.unavailable {
            return Err(PdfAskError::backend_spawn("ollama: No such file or directory"));
        }

        let (tx, rx) = mpsc::channel(8);
        let chunks = self.chunks.clone();
        let task = tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(BackendEvent::Chunk(Bytes::from_static(chunk.as_bytes()))).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(BackendEvent::Finished).await;
        });

        Ok(BackendInvocation {
            events: rx,
            handle: BackendHandle::new(CancellationToken::new(), task),
        })
    }
}

/// Extractor returning a fixed document and remembering where it looked
pub struct FakeExtractor {
    document: Option<ExtractedDocument>,
    pub seen: Mutex<Vec<(PathBuf, bool)>>,
}

impl FakeExtractor {
    pub fn pages(pages: usize) -> Self {
        Self {
            document: Some(ExtractedDocument {
                text: "Policy term: 12 months.".to_string(),
                pages,
            }),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn broken() -> Self {
        Self {
            document: None,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DocumentExtractor for FakeExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument> {
        self.seen
            .lock()
            .unwrap()
            .push((path.to_path_buf(), path.exists()));

        self.document
            .clone()
            .ok_or_else(|| PdfAskError::extraction("not a PDF"))
    }
}

pub fn state(
    upload_dir: &Path,
    backend: Arc<dyn InferenceBackend>,
    extractor: Arc<dyn DocumentExtractor>,
) -> AppState {
    let mut config = PdfAskConfig::default();
    config.upload.dir = upload_dir.to_path_buf();
    AppState::with_components(config, backend, extractor).unwrap()
}

pub async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
