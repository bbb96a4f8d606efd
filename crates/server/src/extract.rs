//! Text extraction for uploaded documents

use async_trait::async_trait;
use pdfask_common::{PdfAskError, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Plain text of a document plus its page count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub text: String,
    pub pages: usize,
}

/// Turns a stored document into text
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument>;
}

/// Extractor backed by poppler's `pdftotext`
#[derive(Debug, Clone)]
pub struct PdfToTextExtractor {
    program: String,
}

impl PdfToTextExtractor {
    pub fn new() -> Self {
        Self::with_program("pdftotext")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for PdfToTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentExtractor for PdfToTextExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument> {
        let output = Command::new(&self.program)
            .arg("-layout")
            .arg("-enc")
            .arg("UTF-8")
            .arg(path)
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PdfAskError::extraction(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(PdfAskError::extraction(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        let document = split_pages(&raw);
        debug!(
            "Extracted {} pages ({} bytes) from {}",
            document.pages,
            document.text.len(),
            path.display()
        );

        Ok(document)
    }
}

/// Count pages in `pdftotext` output, which ends every page with a form feed
pub fn split_pages(raw: &str) -> ExtractedDocument {
    let mut pages = raw.matches('\u{c}').count();
    if pages == 0 && !raw.trim().is_empty() {
        pages = 1;
    }

    let text = raw
        .split('\u{c}')
        .map(str::trim_end)
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    ExtractedDocument { text, pages }
}
