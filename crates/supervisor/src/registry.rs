//! Model registry
//!
//! Holds the configured models and which one new sessions use. Switching only
//! changes that pointer; sessions already running keep the snapshot they took.

use pdfask_common::config::{ModelConfig, ModelsConfig};
use pdfask_common::{PdfAskError, Result};
use parking_lot::RwLock;
use tracing::info;

pub struct ModelRegistry {
    models: Vec<ModelConfig>,
    active: RwLock<usize>,
}

impl ModelRegistry {
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        if config.entries.is_empty() {
            return Err(PdfAskError::config("No models configured"));
        }

        let active = config
            .entries
            .iter()
            .position(|m| m.id == config.default_model)
            .ok_or_else(|| {
                PdfAskError::config(format!(
                    "Default model {} is not configured",
                    config.default_model
                ))
            })?;

        Ok(Self {
            models: config.entries.clone(),
            active: RwLock::new(active),
        })
    }

    /// Look up a model by id
    pub fn get(&self, id: &str) -> Result<&ModelConfig> {
        self.models
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| PdfAskError::ModelNotFound(id.to_string()))
    }

    /// Owned snapshot of the active model
    pub fn active(&self) -> ModelConfig {
        self.models[*self.active.read()].clone()
    }

    pub fn active_id(&self) -> String {
        self.models[*self.active.read()].id.clone()
    }

    /// Make `id` the model used by new sessions
    pub fn switch_active(&self, id: &str) -> Result<ModelConfig> {
        let index = self
            .models
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| PdfAskError::ModelNotFound(id.to_string()))?;

        let previous = std::mem::replace(&mut *self.active.write(), index);
        info!(
            "Active model switched from {} to {}",
            self.models[previous].id, self.models[index].id
        );

        Ok(self.models[index].clone())
    }

    pub fn list(&self) -> &[ModelConfig] {
        &self.models
    }
}
