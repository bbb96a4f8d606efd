//! PdfAsk inference supervisor
//!
//! Builds prompts, runs them against a local model backend and streams the
//! output to a sink under a deadline.
//!
//! ## Components
//!
//! - **Prompt**: deterministic prompt rendering with context cleanup
//! - **Backend**: child process and local HTTP server adapters
//! - **Supervisor**: per-session state machine with timeout and cancellation
//! - **Registry**: configured models and the active selection

pub mod backend;
pub mod prompt;
pub mod registry;
pub mod session;
pub mod sink;
pub mod supervisor;

pub use backend::{BackendAdapter, BackendEvent, BackendHandle, BackendInvocation, InferenceBackend};
pub use prompt::{Prompt, PromptBuilder};
pub use registry::ModelRegistry;
pub use session::{InferenceRequest, SessionOutcome, SessionState, StreamSession};
pub use sink::{BufferSink, ChannelSink, ResponseSink};
pub use supervisor::StreamSupervisor;
