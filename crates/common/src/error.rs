//! Common error types for PdfAsk
//!
//! This module defines all error types used across the PdfAsk system.
//! Every error maps to an HTTP status code so handlers can report failures
//! that happen before a response stream has started.

use thiserror::Error;

/// Main error type for PdfAsk
#[derive(Error, Debug)]
pub enum PdfAskError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or invalid user input. Never reaches the supervisor.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The backend process or connection could not be started
    #[error("Backend failed to start: {0}")]
    BackendSpawn(String),

    /// The backend exited non-zero or returned a malformed response
    #[error("Backend failed: {0}")]
    BackendExit(String),

    /// The backend reported success without producing any output
    #[error("Backend produced no output")]
    EmptyOutput,

    /// Deadline exceeded
    #[error("Model timed out after {0}s")]
    Timeout(u64),

    /// The caller went away or the server is shutting down
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    /// Unknown model id
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Document text extraction errors
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Outbound HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PdfAskError {
    /// Convert error to an HTTP status code
    pub fn http_status(&self) -> u16 {
        match self {
            PdfAskError::Validation(_) => 400,
            PdfAskError::ModelNotFound(_) => 404,
            PdfAskError::Timeout(_) => 504,
            PdfAskError::BackendSpawn(_)
            | PdfAskError::BackendExit(_)
            | PdfAskError::EmptyOutput
            | PdfAskError::Http(_) => 502,
            PdfAskError::Cancelled(_) => 499,
            PdfAskError::Config(_)
            | PdfAskError::Extraction(_)
            | PdfAskError::Serialization(_)
            | PdfAskError::Io(_)
            | PdfAskError::Internal(_) => 500,
        }
    }

    /// True for failures attributable to the inference backend.
    ///
    /// `EmptyOutput` is reported to users the same way as `BackendExit`; it is
    /// kept distinct so callers can tell the two apart.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            PdfAskError::BackendSpawn(_)
                | PdfAskError::BackendExit(_)
                | PdfAskError::EmptyOutput
                | PdfAskError::Http(_)
        )
    }

    /// Short text suitable for writing into a response stream.
    pub fn user_message(&self) -> String {
        match self {
            PdfAskError::EmptyOutput | PdfAskError::BackendExit(_) => {
                "Failed to get answer from AI".to_string()
            }
            PdfAskError::BackendSpawn(_) | PdfAskError::Http(_) => {
                "AI backend is unavailable".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        PdfAskError::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        PdfAskError::Validation(msg.into())
    }

    /// Create a backend spawn error
    pub fn backend_spawn(msg: impl Into<String>) -> Self {
        PdfAskError::BackendSpawn(msg.into())
    }

    /// Create a backend exit error
    pub fn backend_exit(msg: impl Into<String>) -> Self {
        PdfAskError::BackendExit(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        PdfAskError::Cancelled(msg.into())
    }

    /// Create an extraction error
    pub fn extraction(msg: impl Into<String>) -> Self {
        PdfAskError::Extraction(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        PdfAskError::Internal(msg.into())
    }
}

/// Result type alias for PdfAsk operations
pub type Result<T> = std::result::Result<T, PdfAskError>;
