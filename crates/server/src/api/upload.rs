//! PDF upload and text extraction

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use pdfask_common::METRICS;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;

const PDF_FIELD: &str = "pdf";
const PDF_MIME: &str = "application/pdf";
const FALLBACK_NAME: &str = "document.pdf";
const MAX_STORED_NAME: usize = 100;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub text: String,
    pub pages: usize,
    pub filename: String,
}

/// Uploaded file on disk, removed when dropped
struct StoredUpload {
    path: PathBuf,
}

impl StoredUpload {
    async fn write(dir: &Path, original_name: &str, bytes: &[u8]) -> std::io::Result<Self> {
        let stored = Self {
            path: dir.join(format!("{}-{}", Uuid::new_v4(), sanitize_filename(original_name))),
        };
        tokio::fs::write(&stored.path, bytes).await?;
        Ok(stored)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoredUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove upload {}: {}", self.path.display(), e),
        }
    }
}

/// Final path component with anything outside `[A-Za-z0-9._-]` replaced
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STORED_NAME)
        .collect();

    if cleaned.trim_matches(|c: char| c == '.' || c == '_').is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

fn reject(message: impl Into<String>) -> ApiError {
    METRICS.upload.uploads_rejected.inc();
    ApiError::bad_request(message)
}

fn too_large(limit: usize) -> ApiError {
    reject(format!("PDF exceeds maximum size of {} bytes", limit))
}

fn multipart_error(e: MultipartError, limit: usize) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return too_large(limit);
    }
    reject(format!("Invalid multipart payload: {}", e.body_text()))
}

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let limits = &state.config.upload;

    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limits.max_file_bytes))?
    {
        if field.name() != Some(PDF_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or(FALLBACK_NAME).to_string();
        if field.content_type() != Some(PDF_MIME) {
            return Err(reject("Only PDF files are allowed"));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, limits.max_file_bytes))?;
        file = Some((filename, bytes));
        break;
    }

    let (filename, bytes) = match file {
        Some((filename, bytes)) if !bytes.is_empty() => (filename, bytes),
        _ => return Err(reject("No PDF file uploaded")),
    };
    if bytes.len() > limits.max_file_bytes {
        return Err(too_large(limits.max_file_bytes));
    }

    info!("Uploading PDF {} ({} bytes)", filename, bytes.len());

    let stored = StoredUpload::write(&limits.dir, &filename, &bytes)
        .await
        .map_err(|e| {
            error!("Failed to store upload {}: {}", filename, e);
            ApiError::internal("Failed to process PDF")
        })?;

    let document = state.extractor.extract(stored.path()).await.map_err(|e| {
        METRICS.upload.extraction_failures.inc();
        error!("PDF processing error for {}: {}", filename, e);
        ApiError::internal("Failed to process PDF")
    })?;
    drop(stored);

    if document.pages > limits.max_pages {
        return Err(reject(format!(
            "PDF has {} pages. Maximum allowed is {} pages.",
            document.pages, limits.max_pages
        )));
    }

    METRICS.upload.uploads_accepted.inc();
    METRICS.upload.pages.observe(document.pages as f64);
    info!(
        "Extracted {} pages ({} bytes of text) from {}",
        document.pages,
        document.text.len(),
        filename
    );

    Ok(Json(UploadResponse {
        success: true,
        text: document.text,
        pages: document.pages,
        filename,
    }))
}
