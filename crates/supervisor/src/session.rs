//! Per-request session state
//!
//! A [`StreamSession`] is owned by exactly one supervisor task. Its `settled`
//! latch only moves from false to true, and once it has, chunks are refused.

use bytes::{Bytes, BytesMut};
use pdfask_common::{PdfAskError, Result};
use std::time::{Duration, Instant, SystemTime};
use uuid::Uuid;

/// A validated question, immutable once built
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub id: Uuid,
    pub question: String,
    pub context: Option<String>,
    pub requested_at: SystemTime,
}

impl InferenceRequest {
    /// Build a request, rejecting blank questions
    pub fn new(question: impl Into<String>, context: Option<String>) -> Result<Self> {
        let question = question.into();
        if question.trim().is_empty() {
            return Err(PdfAskError::validation("Question is required"));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            question,
            context: context.filter(|c| !c.trim().is_empty()),
            requested_at: SystemTime::now(),
        })
    }
}

/// Supervisor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    TimedOut,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::TimedOut | SessionState::Failed
        )
    }
}

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// Backend succeeded with output
    Completed { bytes: usize, elapsed: Duration },

    /// Deadline fired first
    TimedOut { bytes: usize, elapsed: Duration },

    /// Spawn error, backend failure, empty output or cancellation
    Failed {
        error: PdfAskError,
        bytes: usize,
        elapsed: Duration,
    },
}

impl SessionOutcome {
    pub fn state(&self) -> SessionState {
        match self {
            SessionOutcome::Completed { .. } => SessionState::Completed,
            SessionOutcome::TimedOut { .. } => SessionState::TimedOut,
            SessionOutcome::Failed { .. } => SessionState::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Completed { .. })
    }

    /// Answer bytes delivered before the outcome
    pub fn bytes(&self) -> usize {
        match self {
            SessionOutcome::Completed { bytes, .. }
            | SessionOutcome::TimedOut { bytes, .. }
            | SessionOutcome::Failed { bytes, .. } => *bytes,
        }
    }

    pub fn error(&self) -> Option<&PdfAskError> {
        match self {
            SessionOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Mutable state of one in-flight inference call
#[derive(Debug)]
pub struct StreamSession {
    id: Uuid,
    started_at: Instant,
    state: SessionState,
    settled: bool,
    accumulated: BytesMut,
    bytes_written: usize,
    delivered_output: bool,
    first_chunk_at: Option<Instant>,
}

impl StreamSession {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            started_at: Instant::now(),
            state: SessionState::Idle,
            settled: false,
            accumulated: BytesMut::new(),
            bytes_written: 0,
            delivered_output: false,
            first_chunk_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn output(&self) -> &[u8] {
        &self.accumulated
    }

    /// Idle → Running
    pub fn start(&mut self) {
        if self.state == SessionState::Idle {
            self.started_at = Instant::now();
            self.state = SessionState::Running;
        }
    }

    /// Accept a chunk unless the session is settled
    pub fn record_chunk(&mut self, chunk: &Bytes) -> bool {
        if self.settled {
            return false;
        }
        self.accumulated.extend_from_slice(chunk);
        true
    }

    /// Note a chunk that reached the sink; returns true for the first write
    pub fn mark_written(&mut self, chunk: &[u8]) -> bool {
        self.bytes_written += chunk.len();
        self.delivered_output |= !is_blank(chunk);
        if self.first_chunk_at.is_none() {
            self.first_chunk_at = Some(Instant::now());
            return true;
        }
        false
    }

    /// Time from start to the first delivered chunk
    pub fn time_to_first_chunk(&self) -> Option<Duration> {
        self.first_chunk_at
            .map(|at| at.saturating_duration_since(self.started_at))
    }

    /// Whether the backend produced anything besides whitespace
    pub fn has_output(&self) -> bool {
        !is_blank(&self.accumulated)
    }

    /// Whether anything besides whitespace actually reached the sink
    pub fn has_delivered_output(&self) -> bool {
        self.delivered_output
    }

    /// Move to a terminal state. Returns false if already settled.
    pub fn settle(&mut self, state: SessionState) -> bool {
        debug_assert!(state.is_terminal());
        if self.settled {
            return false;
        }
        self.settled = true;
        self.state = state;
        true
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(InferenceRequest::new("  ", None).is_err());

        let request = InferenceRequest::new("What?", Some("   ".to_string())).unwrap();
        assert_eq!(request.question, "What?");
        assert!(request.context.is_none());
    }

    #[test]
    fn test_settle_is_one_way() {
        let mut session = StreamSession::new(Uuid::new_v4());
        assert_eq!(session.state(), SessionState::Idle);

        session.start();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.record_chunk(&Bytes::from_static(b"partial")));

        assert!(session.settle(SessionState::TimedOut));
        assert!(!session.settle(SessionState::Completed));
        assert!(!session.settle(SessionState::Failed));
        assert_eq!(session.state(), SessionState::TimedOut);

        assert!(!session.record_chunk(&Bytes::from_static(b"late")));
        assert_eq!(session.output(), b"partial");
    }

    #[test]
    fn test_has_output_ignores_whitespace() {
        let mut session = StreamSession::new(Uuid::new_v4());
        session.start();
        session.record_chunk(&Bytes::from_static(b" \n\t"));
        assert!(!session.has_output());

        session.record_chunk(&Bytes::from_static(b"x"));
        assert!(session.has_output());
    }

    #[test]
    fn test_first_write_tracking() {
        let mut session = StreamSession::new(Uuid::new_v4());
        session.start();

        assert!(session.mark_written(b"  \n"));
        assert!(!session.has_delivered_output());
        assert!(!session.mark_written(b"ok"));
        assert_eq!(session.bytes_written(), 5);
        assert!(session.has_delivered_output());
        assert!(session.time_to_first_chunk().is_some());
    }

    #[test]
    fn test_recorded_output_is_not_delivered_output() {
        let mut session = StreamSession::new(Uuid::new_v4());
        session.start();
        session.record_chunk(&Bytes::from_static(b"answer"));

        assert!(session.has_output());
        assert!(!session.has_delivered_output());
        assert_eq!(session.bytes_written(), 0);
    }
}
