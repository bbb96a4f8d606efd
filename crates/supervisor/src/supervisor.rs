//! Stream supervisor
//!
//! Drives one inference session from prompt to a single terminal outcome.
//! The deadline, external cancellation, sink closure and backend events race
//! in a biased `select!`; whichever resolves first settles the session and
//! the rest are ignored.

use crate::backend::{BackendEvent, BackendHandle, BackendInvocation, InferenceBackend};
use crate::prompt::PromptBuilder;
use crate::session::{InferenceRequest, SessionOutcome, SessionState, StreamSession};
use crate::sink::ResponseSink;
use bytes::Bytes;
use pdfask_common::config::{ModelConfig, StreamConfig, TimeoutNotice};
use pdfask_common::metrics::ActiveSessionGuard;
use pdfask_common::{PdfAskError, METRICS};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What woke the supervisor loop
enum Step {
    Deadline,
    Cancelled(&'static str),
    Event(Option<BackendEvent>),
}

/// Runs sessions against a backend
pub struct StreamSupervisor {
    backend: Arc<dyn InferenceBackend>,
    prompts: PromptBuilder,
    config: StreamConfig,
}

impl StreamSupervisor {
    pub fn new(backend: Arc<dyn InferenceBackend>, prompts: PromptBuilder, config: StreamConfig) -> Self {
        Self {
            backend,
            prompts,
            config,
        }
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    /// Run `request` against `model`, forwarding output to `sink`.
    ///
    /// The sink is closed exactly once before this returns. `cancel` aborts
    /// the session, e.g. on server shutdown.
    #[instrument(name = "supervisor.run", skip_all, fields(session = %request.id, model = %model.id))]
    pub async fn run<S>(
        &self,
        request: &InferenceRequest,
        model: &ModelConfig,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> SessionOutcome
    where
        S: ResponseSink + ?Sized,
    {
        let metrics = &METRICS.inference;
        metrics.sessions_total.inc();
        let _active = ActiveSessionGuard::new(&metrics.active_sessions);

        let mut session = StreamSession::new(request.id);
        let prompt = self
            .prompts
            .build(&request.question, request.context.as_deref(), model);
        let timeout = model.timeout();

        session.start();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        debug!(
            "Starting session with {} prompt bytes, timeout {:?}",
            prompt.len(),
            timeout
        );

        let BackendInvocation {
            mut events,
            mut handle,
        } = match self.backend.invoke(&prompt, model).await {
            Ok(invocation) => invocation,
            Err(e) => {
                metrics.backend_spawn_failures.inc();
                let outcome = self.fail(&mut session, sink, e).await;
                return self.finish(&session, outcome);
            }
        };

        let outcome = loop {
            let step = tokio::select! {
                biased;
                _ = &mut deadline => Step::Deadline,
                _ = cancel.cancelled() => Step::Cancelled("server shutting down"),
                _ = sink.closed() => Step::Cancelled("client disconnected"),
                event = events.recv() => Step::Event(event),
            };

            match step {
                Step::Event(Some(BackendEvent::Chunk(chunk))) => {
                    if !session.record_chunk(&chunk) {
                        continue;
                    }

                    // A slow client must not hold the session past its deadline
                    let written = tokio::select! {
                        biased;
                        _ = &mut deadline => None,
                        written = sink.write(chunk.clone()) => Some(written),
                    };

                    match written {
                        Some(Ok(())) => {
                            if session.mark_written(&chunk) {
                                if let Some(ttfc) = session.time_to_first_chunk() {
                                    metrics.time_to_first_chunk.observe(ttfc.as_secs_f64());
                                }
                            }
                        }
                        Some(Err(e)) => {
                            self.stop_backend(&mut handle).await;
                            break self.fail(&mut session, sink, e).await;
                        }
                        None => break self.time_out(&mut session, &mut handle, sink, timeout).await,
                    }
                }
                Step::Event(Some(BackendEvent::Finished)) => {
                    if session.has_output() {
                        break self.complete(&mut session, sink).await;
                    }
                    metrics.empty_output_total.inc();
                    break self.fail(&mut session, sink, PdfAskError::EmptyOutput).await;
                }
                Step::Event(Some(BackendEvent::Failed(e))) => {
                    break self.fail(&mut session, sink, e).await;
                }
                Step::Event(None) => {
                    let e = PdfAskError::backend_exit("backend stopped without reporting a result");
                    break self.fail(&mut session, sink, e).await;
                }
                Step::Deadline => {
                    break self.time_out(&mut session, &mut handle, sink, timeout).await;
                }
                Step::Cancelled(reason) => {
                    self.stop_backend(&mut handle).await;
                    break self
                        .fail(&mut session, sink, PdfAskError::cancelled(reason))
                        .await;
                }
            }
        };

        self.finish(&session, outcome)
    }

    async fn complete<S>(&self, session: &mut StreamSession, sink: &mut S) -> SessionOutcome
    where
        S: ResponseSink + ?Sized,
    {
        session.settle(SessionState::Completed);
        sink.close().await;

        SessionOutcome::Completed {
            bytes: session.bytes_written(),
            elapsed: session.elapsed(),
        }
    }

    async fn time_out<S>(
        &self,
        session: &mut StreamSession,
        handle: &mut BackendHandle,
        sink: &mut S,
        timeout: Duration,
    ) -> SessionOutcome
    where
        S: ResponseSink + ?Sized,
    {
        session.settle(SessionState::TimedOut);
        self.stop_backend(handle).await;

        let partial = session.has_delivered_output();
        if !partial || self.config.timeout_notice == TimeoutNotice::Always {
            let error = PdfAskError::Timeout(timeout.as_secs());
            let separator = if partial { "\n\n" } else { "" };
            let notice = format!("{}ERROR: {}", separator, error.user_message());
            self.deliver_notice(sink, notice).await;
        }
        sink.close().await;

        SessionOutcome::TimedOut {
            bytes: session.bytes_written(),
            elapsed: session.elapsed(),
        }
    }

    async fn fail<S>(&self, session: &mut StreamSession, sink: &mut S, error: PdfAskError) -> SessionOutcome
    where
        S: ResponseSink + ?Sized,
    {
        session.settle(SessionState::Failed);

        // Partial answers are left as they are
        if !session.has_delivered_output() {
            let message = format!("ERROR: {}", error.user_message());
            self.deliver_notice(sink, message).await;
        }
        sink.close().await;

        SessionOutcome::Failed {
            error,
            bytes: session.bytes_written(),
            elapsed: session.elapsed(),
        }
    }

    /// Best-effort write of a closing message, bounded by the terminate grace
    async fn deliver_notice<S>(&self, sink: &mut S, message: String)
    where
        S: ResponseSink + ?Sized,
    {
        let grace = self.config.terminate_grace();
        match tokio::time::timeout(grace, sink.write(Bytes::from(message))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Could not deliver closing message: {}", e),
            Err(_) => debug!("Client not reading, closing message dropped after {:?}", grace),
        }
    }

    async fn stop_backend(&self, handle: &mut BackendHandle) {
        handle.terminate(self.config.terminate_grace()).await;
    }

    fn finish(&self, session: &StreamSession, outcome: SessionOutcome) -> SessionOutcome {
        let metrics = &METRICS.inference;
        let elapsed = session.elapsed();

        metrics.session_duration.observe(elapsed.as_secs_f64());
        metrics
            .bytes_streamed_total
            .inc_by(session.bytes_written() as u64);

        match &outcome {
            SessionOutcome::Completed { bytes, .. } => {
                metrics.sessions_completed.inc();
                info!("Session completed: {} bytes in {:?}", bytes, elapsed);
            }
            SessionOutcome::TimedOut { bytes, .. } => {
                metrics.sessions_timed_out.inc();
                warn!("Session timed out after {:?} ({} bytes streamed)", elapsed, bytes);
            }
            SessionOutcome::Failed { error, bytes, .. } => {
                metrics.sessions_failed.inc();
                match error {
                    PdfAskError::Cancelled(reason) => {
                        info!("Session cancelled: {} ({} bytes streamed)", reason, bytes)
                    }
                    _ => warn!("Session failed: {} ({} bytes streamed)", error, bytes),
                }
            }
        }

        outcome
    }
}
