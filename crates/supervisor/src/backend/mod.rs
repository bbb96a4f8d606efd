//! Inference backend adapters
//!
//! A backend turns a prompt into a stream of [`BackendEvent`]s. Each
//! invocation owns exactly one child process or outbound connection, driven
//! by a dedicated task that pushes events into a bounded channel in the order
//! the backend produced them. Adapters never retry.

pub mod http;
pub mod process;
pub mod sse;

use crate::prompt::Prompt;
use async_trait::async_trait;
use bytes::Bytes;
use pdfask_common::config::{BackendKind, ModelConfig, StreamConfig};
use pdfask_common::{PdfAskError, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use http::HttpServerBackend;
pub use process::StdinProcessBackend;

/// Output of a running backend
#[derive(Debug)]
pub enum BackendEvent {
    /// Incremental output, forwarded verbatim
    Chunk(Bytes),

    /// Process exited 0 / response body ended cleanly
    Finished,

    /// Non-zero exit, malformed response or transport failure
    Failed(PdfAskError),
}

/// A started backend call
pub struct BackendInvocation {
    /// Events in arrival order; at most one terminal event
    pub events: mpsc::Receiver<BackendEvent>,

    /// Control over the underlying process or connection
    pub handle: BackendHandle,
}

/// Handle used to force-stop a backend
///
/// Dropping the handle also cancels the backend.
pub struct BackendHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl BackendHandle {
    pub fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Whether termination has been requested
    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Signal the backend to stop and wait up to `grace` for its driver task.
    ///
    /// Best effort: failures are logged, never returned.
    pub async fn terminate(&mut self, grace: Duration) {
        self.cancel.cancel();

        let Some(mut task) = self.task.take() else {
            return;
        };

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => debug!("Backend stopped after termination"),
            Ok(Err(e)) => warn!("Backend driver task failed during termination: {}", e),
            Err(_) => {
                warn!(
                    "Backend did not stop within {:?}; aborting driver task",
                    grace
                );
                task.abort();
            }
        }
    }
}

impl Drop for BackendHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Something that can run a prompt against a model
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Start the backend. Errors here mean nothing was started.
    async fn invoke(&self, prompt: &Prompt, model: &ModelConfig) -> Result<BackendInvocation>;
}

/// Dispatches to the adapter matching the model's backend kind
pub struct BackendAdapter {
    process: StdinProcessBackend,
    http: HttpServerBackend,
}

impl BackendAdapter {
    pub fn new(stream: &StreamConfig) -> Result<Self> {
        Ok(Self {
            process: StdinProcessBackend::new(stream.channel_capacity),
            http: HttpServerBackend::new(stream.channel_capacity)?,
        })
    }
}

#[async_trait]
impl InferenceBackend for BackendAdapter {
    async fn invoke(&self, prompt: &Prompt, model: &ModelConfig) -> Result<BackendInvocation> {
        match model.backend {
            BackendKind::StdinProcess => self.process.invoke(prompt, model).await,
            BackendKind::HttpServer => self.http.invoke(prompt, model).await,
        }
    }
}

/// Send an event unless the invocation has been cancelled.
///
/// Returns false when the receiver is gone or cancellation won the race;
/// the driver should stop in either case.
pub(crate) async fn emit(
    tx: &mpsc::Sender<BackendEvent>,
    cancel: &CancellationToken,
    event: BackendEvent,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminate_cancels_and_joins() {
        let cancel = CancellationToken::new();
        let observed = cancel.clone();
        let task = tokio::spawn(async move { observed.cancelled().await });

        let mut handle = BackendHandle::new(cancel, task);
        assert!(!handle.is_terminated());

        handle.terminate(Duration::from_secs(1)).await;
        assert!(handle.is_terminated());

        // Second call is a no-op
        handle.terminate(Duration::from_secs(1)).await;
    }

    #[test]
    fn test_adapter_builds_from_default_config() {
        let adapter = BackendAdapter::new(&StreamConfig::default());
        assert!(adapter.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_aborts_stuck_driver() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let mut handle = BackendHandle::new(cancel, task);
        handle.terminate(Duration::from_millis(50)).await;
        assert!(handle.is_terminated());
    }

    #[tokio::test]
    async fn test_emit_stops_after_cancel() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        assert!(emit(&tx, &cancel, BackendEvent::Finished).await);
        cancel.cancel();
        assert!(!emit(&tx, &cancel, BackendEvent::Finished).await);

        assert!(matches!(rx.recv().await, Some(BackendEvent::Finished)));
    }
}
