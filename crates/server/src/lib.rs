//! PdfAsk HTTP server
//!
//! Upload a PDF, then ask questions about it; answers stream back as plain
//! text while a local model generates them.

pub mod api;
pub mod error;
pub mod extract;
pub mod state;

pub use api::create_router;
pub use error::ApiError;
pub use extract::{DocumentExtractor, ExtractedDocument, PdfToTextExtractor};
pub use state::AppState;
