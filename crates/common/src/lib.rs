//! PdfAsk common library
//!
//! This crate contains the error taxonomy, configuration and metrics shared by
//! the supervisor and the HTTP server.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::{
    BackendKind, ModelConfig, ModelsConfig, PdfAskConfig, PromptTemplate, SamplingParams,
    StreamConfig, TimeoutNotice,
};
pub use error::{PdfAskError, Result};
pub use metrics::{MetricsRegistry, METRICS};
