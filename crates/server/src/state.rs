//! Shared application state

use crate::extract::{DocumentExtractor, PdfToTextExtractor};
use pdfask_common::{PdfAskConfig, Result};
use pdfask_supervisor::{BackendAdapter, InferenceBackend, ModelRegistry, PromptBuilder, StreamSupervisor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cloned into every handler; everything inside is shared
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PdfAskConfig>,
    pub registry: Arc<ModelRegistry>,
    pub supervisor: Arc<StreamSupervisor>,
    pub extractor: Arc<dyn DocumentExtractor>,
    /// Cancelled on shutdown; each session gets a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Production wiring: real backends and `pdftotext`
    pub fn new(config: PdfAskConfig) -> Result<Self> {
        let backend = Arc::new(BackendAdapter::new(&config.stream)?);
        Self::with_components(config, backend, Arc::new(PdfToTextExtractor::new()))
    }

    pub fn with_components(
        config: PdfAskConfig,
        backend: Arc<dyn InferenceBackend>,
        extractor: Arc<dyn DocumentExtractor>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.upload.dir)?;

        let registry = ModelRegistry::new(&config.models)?;
        let supervisor = StreamSupervisor::new(
            backend,
            PromptBuilder::new(&config.prompt),
            config.stream.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            supervisor: Arc::new(supervisor),
            extractor,
            shutdown: CancellationToken::new(),
        })
    }
}
