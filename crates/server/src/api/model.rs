//! Model listing and switching
//!
//! Switching changes which configured model new sessions use. It does not
//! start or stop any inference server; `restartCommand` tells the operator
//! how to launch one when the model needs it.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use pdfask_common::{BackendKind, ModelConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub id: String,
    pub display_name: String,
    pub backend: BackendKind,
    pub model_reference: String,
    pub context_size: u32,
    pub use_gpu: bool,
    pub timeout_secs: u64,
    pub stream: bool,
}

impl From<&ModelConfig> for ModelSummary {
    fn from(model: &ModelConfig) -> Self {
        Self {
            id: model.id.clone(),
            display_name: model.display_name.clone(),
            backend: model.backend,
            model_reference: model.model_reference.clone(),
            context_size: model.context_size,
            use_gpu: model.use_gpu,
            timeout_secs: model.timeout().as_secs(),
            stream: model.stream,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ModelListResponse {
    pub active: String,
    pub models: Vec<ModelSummary>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchModelRequest {
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchModelResponse {
    pub success: bool,
    pub active: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_command: Option<String>,
}

pub async fn list_models(State(state): State<AppState>) -> Json<ModelListResponse> {
    Json(ModelListResponse {
        active: state.registry.active_id(),
        models: state.registry.list().iter().map(ModelSummary::from).collect(),
    })
}

pub async fn switch_model(
    State(state): State<AppState>,
    Json(body): Json<SwitchModelRequest>,
) -> Result<Json<SwitchModelResponse>, ApiError> {
    let id = body
        .model
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::bad_request("Model is required"))?;

    let model = state.registry.switch_active(&id)?;

    Ok(Json(SwitchModelResponse {
        success: true,
        message: format!("Active model set to {}", model.display_name),
        active: model.id,
        restart_command: model.launch_command,
    }))
}
