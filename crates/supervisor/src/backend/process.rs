//! One-shot child process backend
//!
//! The prompt is written to the child's stdin, which is then closed. Every
//! read from stdout becomes a chunk. Exit status 0 reports `Finished`; any
//! other status reports `BackendExit` with the captured stderr tail.

use super::{emit, BackendEvent, BackendHandle, BackendInvocation, InferenceBackend};
use crate::prompt::Prompt;
use async_trait::async_trait;
use bytes::Bytes;
use pdfask_common::config::ModelConfig;
use pdfask_common::{PdfAskError, Result};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 4096;
const STDERR_CAPTURE_LIMIT: usize = 8 * 1024;

/// Runs a process per request
#[derive(Debug, Clone)]
pub struct StdinProcessBackend {
    channel_capacity: usize,
}

impl StdinProcessBackend {
    pub fn new(channel_capacity: usize) -> Self {
        Self { channel_capacity }
    }
}

/// Program and arguments for `model`, placeholders filled in
pub fn command_line(model: &ModelConfig) -> (String, Vec<String>) {
    let command = model.command();
    let sampling = &model.sampling;
    let gpu_layers = if model.use_gpu { "99" } else { "0" };

    let substitutions = [
        ("{model}", model.model_reference.clone()),
        ("{temperature}", sampling.temperature.to_string()),
        ("{top_p}", sampling.top_p.to_string()),
        ("{repeat_penalty}", sampling.repeat_penalty.to_string()),
        ("{max_tokens}", sampling.max_tokens.to_string()),
        ("{context_size}", model.context_size.to_string()),
        ("{gpu_layers}", gpu_layers.to_string()),
    ];

    let args = command
        .args
        .iter()
        .map(|arg| {
            substitutions
                .iter()
                .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
        })
        .collect();

    (command.program, args)
}

#[async_trait]
impl InferenceBackend for StdinProcessBackend {
    async fn invoke(&self, prompt: &Prompt, model: &ModelConfig) -> Result<BackendInvocation> {
        let (program, args) = command_line(model);

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PdfAskError::backend_spawn(format!("{}: {}", program, e)))?;

        info!(
            pid = child.id(),
            "Spawned {} for model {} ({} prompt bytes)",
            program,
            model.id,
            prompt.len()
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PdfAskError::backend_spawn("Failed to get stdin from process"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PdfAskError::backend_spawn("Failed to get stdout from process"))?;

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive_process(
            child,
            stdin,
            stdout,
            prompt.as_str().to_owned(),
            tx,
            cancel.clone(),
        ));

        Ok(BackendInvocation {
            events: rx,
            handle: BackendHandle::new(cancel, task),
        })
    }
}

async fn drive_process(
    mut child: Child,
    mut stdin: ChildStdin,
    mut stdout: ChildStdout,
    prompt: String,
    tx: mpsc::Sender<BackendEvent>,
    cancel: CancellationToken,
) {
    // Written concurrently so a child that talks before it finishes reading
    // cannot deadlock against a full stdin pipe.
    let writer = tokio::spawn(async move {
        if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
            debug!("Backend stopped reading its prompt: {}", e);
        }
        if let Err(e) = stdin.shutdown().await {
            debug!("Failed to close backend stdin: {}", e);
        }
    });
    let stderr = tokio::spawn(capture_stderr(child.stderr.take()));

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                kill(&mut child).await;
                return;
            }
            read = stdout.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if !emit(&tx, &cancel, BackendEvent::Chunk(chunk)).await {
                    kill(&mut child).await;
                    return;
                }
            }
            Err(e) => {
                kill(&mut child).await;
                let error = PdfAskError::backend_exit(format!("Failed reading output: {}", e));
                emit(&tx, &cancel, BackendEvent::Failed(error)).await;
                return;
            }
        }
    }

    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            kill(&mut child).await;
            return;
        }
        status = child.wait() => status,
    };

    let stderr_tail = stderr.await.unwrap_or_default();
    if writer.await.is_err() {
        debug!("Prompt writer task did not complete");
    }

    let event = match status {
        Ok(status) if status.success() => {
            debug!("Backend process exited successfully");
            BackendEvent::Finished
        }
        Ok(status) => {
            let stderr_tail = if stderr_tail.is_empty() {
                "(empty)".to_string()
            } else {
                stderr_tail
            };
            BackendEvent::Failed(PdfAskError::backend_exit(format!(
                "process exited with {}; stderr: {}",
                status, stderr_tail
            )))
        }
        Err(e) => BackendEvent::Failed(PdfAskError::backend_exit(format!(
            "Failed waiting for process: {}",
            e
        ))),
    };

    emit(&tx, &cancel, event).await;
}

async fn kill(child: &mut Child) {
    let pid = child.id();
    if let Err(e) = child.kill().await {
        warn!(pid, "Failed to kill backend process: {}", e);
    } else {
        debug!(pid, "Backend process killed");
    }
}

/// Drain stderr, keeping at most `STDERR_CAPTURE_LIMIT` bytes
async fn capture_stderr<R: AsyncRead + Unpin>(stderr: Option<R>) -> String {
    let Some(mut stderr) = stderr else {
        return String::new();
    };

    let mut captured = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                debug!("[backend stderr] {}", String::from_utf8_lossy(&buf[..n]).trim_end());
                let room = STDERR_CAPTURE_LIMIT.saturating_sub(captured.len());
                captured.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }

    String::from_utf8_lossy(&captured).trim().to_string()
}
