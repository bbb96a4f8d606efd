//! Configuration structures for PdfAsk
//!
//! Configurations are loaded from YAML files and can be overridden by
//! environment variables prefixed with `PDFASK__` (nested keys separated by
//! `__`, e.g. `PDFASK__UPLOAD__MAX_PAGES=20`).

use crate::error::{PdfAskError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment prefix for layered configuration
pub const ENV_PREFIX: &str = "PDFASK";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfAskConfig {
    /// Server binding address
    pub bind_address: String,

    /// Server port
    pub port: u16,

    /// Available models and the one selected at startup
    pub models: ModelsConfig,

    /// Prompt construction limits
    pub prompt: PromptConfig,

    /// Upload handling
    pub upload: UploadConfig,

    /// Stream supervision tuning
    pub stream: StreamConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

/// Model table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Id of the model active at startup
    pub default_model: String,

    /// All known models
    pub entries: Vec<ModelConfig>,
}

/// How a backend is reached
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// One-shot child process: prompt on stdin, completion on stdout
    StdinProcess,

    /// Long-lived local inference server reached over HTTP
    HttpServer,
}

/// Prompt layout understood by the model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    /// Plain concatenation of context and question
    Plain,

    /// `<|im_start|>` / `<|im_end|>` turn delimiters
    ChatMl,

    /// `<start_of_turn>` / `<end_of_turn>` turn delimiters
    Gemma,
}

/// Sampling parameters forwarded to the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingParams {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,

    /// Maximum number of tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Stop sequences (HTTP backends only)
    #[serde(default)]
    pub stop: Vec<String>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            repeat_penalty: default_repeat_penalty(),
            max_tokens: default_max_tokens(),
            stop: Vec::new(),
        }
    }
}

/// Command line for stdin-process backends
///
/// Arguments may contain the placeholders `{model}`, `{temperature}`,
/// `{top_p}`, `{repeat_penalty}`, `{max_tokens}`, `{context_size}` and
/// `{gpu_layers}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

/// A single backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// Registry key
    pub id: String,

    /// Human-readable name
    pub display_name: String,

    /// Backend shape
    pub backend: BackendKind,

    /// Model file path (stdin-process) or completion endpoint URL (http-server)
    pub model_reference: String,

    /// Context window in tokens
    #[serde(default = "default_context_size")]
    pub context_size: u32,

    /// Offload layers to the GPU
    #[serde(default)]
    pub use_gpu: bool,

    /// Prompt template; defaults by backend kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PromptTemplate>,

    #[serde(default)]
    pub sampling: SamplingParams,

    /// Wall-clock deadline; defaults by backend kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Request server-sent-event streaming from http-server backends
    #[serde(default = "default_stream")]
    pub stream: bool,

    /// Process to run for stdin-process backends; defaults to `ollama run {model}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSpec>,

    /// Per-model override of `prompt.max_context_bytes`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_bytes: Option<usize>,

    /// Operator hint returned when switching to this model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_command: Option<String>,
}

impl ModelConfig {
    /// Deadline for a single request against this model
    pub fn timeout(&self) -> Duration {
        let secs = self.timeout_secs.unwrap_or(match self.backend {
            BackendKind::StdinProcess => 45,
            BackendKind::HttpServer => 180,
        });
        Duration::from_secs(secs)
    }

    /// Template used to render prompts for this model
    pub fn template(&self) -> PromptTemplate {
        self.template.unwrap_or(match self.backend {
            BackendKind::StdinProcess => PromptTemplate::Plain,
            BackendKind::HttpServer => PromptTemplate::ChatMl,
        })
    }

    /// Context byte budget, falling back to the global limit
    pub fn context_budget(&self, global: usize) -> usize {
        self.max_context_bytes.unwrap_or(global)
    }

    /// Command used for stdin-process backends
    pub fn command(&self) -> CommandSpec {
        self.command.clone().unwrap_or_else(|| CommandSpec {
            program: "ollama".to_string(),
            args: vec!["run".to_string(), "{model}".to_string()],
        })
    }
}

/// Prompt construction limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Context text budget in bytes after cleaning
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,

    /// Question budget in bytes
    #[serde(default = "default_max_question_bytes")]
    pub max_question_bytes: usize,

    /// System turn for chat templates
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

/// Upload handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory for in-flight uploads
    #[serde(default = "default_upload_dir")]
    pub dir: PathBuf,

    /// Maximum page count accepted
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Maximum file size accepted
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
}

/// Whether a timeout notice is written after partial output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutNotice {
    /// Always tell the client, separating the notice from partial text
    Always,

    /// Only when nothing has been streamed yet
    WhenEmpty,
}

impl Default for TimeoutNotice {
    fn default() -> Self {
        TimeoutNotice::Always
    }
}

/// Stream supervision tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Bounded channel capacity between backend reader and sink
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// How long to wait for a terminated backend to exit
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,

    #[serde(default)]
    pub timeout_notice: TimeoutNotice,
}

impl StreamConfig {
    /// Get terminate grace period as Duration
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,

    /// Enable structured (JSON) logging
    #[serde(default)]
    pub structured_logging: bool,
}

/// Default value functions
fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.9
}

fn default_repeat_penalty() -> f32 {
    1.1
}

fn default_max_tokens() -> u32 {
    200
}

fn default_context_size() -> u32 {
    2048
}

fn default_stream() -> bool {
    true
}

fn default_max_context_bytes() -> usize {
    6000
}

fn default_max_question_bytes() -> usize {
    2000
}

fn default_system_prompt() -> String {
    "You answer questions about the provided document concisely.".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_pages() -> usize {
    10
}

fn default_max_file_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_channel_capacity() -> usize {
    64
}

fn default_terminate_grace_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_context_bytes: default_max_context_bytes(),
            max_question_bytes: default_max_question_bytes(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            max_pages: default_max_pages(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            terminate_grace_ms: default_terminate_grace_ms(),
            timeout_notice: TimeoutNotice::default(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: default_metrics(),
            structured_logging: false,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: "tinyllama".to_string(),
            entries: vec![
                ModelConfig {
                    id: "tinyllama".to_string(),
                    display_name: "TinyLlama 1.1B (ollama)".to_string(),
                    backend: BackendKind::StdinProcess,
                    model_reference: "tinyllama".to_string(),
                    context_size: default_context_size(),
                    use_gpu: false,
                    template: None,
                    sampling: SamplingParams::default(),
                    timeout_secs: None,
                    stream: true,
                    command: None,
                    max_context_bytes: None,
                    launch_command: None,
                },
                ModelConfig {
                    id: "gemma-2-2b-it".to_string(),
                    display_name: "Gemma 2 2B Instruct (llama-server)".to_string(),
                    backend: BackendKind::HttpServer,
                    model_reference: "http://127.0.0.1:8080/completion".to_string(),
                    context_size: 4096,
                    use_gpu: false,
                    template: Some(PromptTemplate::Gemma),
                    sampling: SamplingParams {
                        stop: vec!["<end_of_turn>".to_string()],
                        ..SamplingParams::default()
                    },
                    timeout_secs: Some(180),
                    stream: true,
                    command: None,
                    max_context_bytes: Some(8000),
                    launch_command: Some(
                        "llama-server --model models/gemma-2-2b-it-Q4_K_M.gguf --host 127.0.0.1 --port 8080 --ctx-size 4096 -ngl 0"
                            .to_string(),
                    ),
                },
            ],
        }
    }
}

impl Default for PdfAskConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5001,
            models: ModelsConfig::default(),
            prompt: PromptConfig::default(),
            upload: UploadConfig::default(),
            stream: StreamConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl PdfAskConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            PdfAskError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: PdfAskConfig = serde_yaml::from_str(&content).map_err(|e| {
            PdfAskError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file layered under `PDFASK__*`
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }

        let config: PdfAskConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| PdfAskError::Config(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.models.entries.is_empty() {
            return Err(PdfAskError::config("At least one model must be configured"));
        }

        let mut seen = HashSet::new();
        for model in &self.models.entries {
            if model.id.trim().is_empty() {
                return Err(PdfAskError::config("Model id must not be empty"));
            }
            if !seen.insert(model.id.as_str()) {
                return Err(PdfAskError::config(format!("Duplicate model id: {}", model.id)));
            }
            if model.timeout_secs == Some(0) {
                return Err(PdfAskError::config(format!(
                    "Model {} has a zero timeout",
                    model.id
                )));
            }
            if model.max_context_bytes == Some(0) {
                return Err(PdfAskError::config(format!(
                    "Model {} has a zero context budget",
                    model.id
                )));
            }
            if model.backend == BackendKind::HttpServer {
                // The HTTP client is built without TLS support
                if model.model_reference.starts_with("https://") {
                    return Err(PdfAskError::config(format!(
                        "Model {} uses {}, but only plain http:// endpoints are supported",
                        model.id, model.model_reference
                    )));
                }
                if !model.model_reference.starts_with("http://") {
                    return Err(PdfAskError::config(format!(
                        "Model {} is an http_server backend but {} is not a URL",
                        model.id, model.model_reference
                    )));
                }
            }
        }

        if !seen.contains(self.models.default_model.as_str()) {
            return Err(PdfAskError::config(format!(
                "Default model {} is not configured",
                self.models.default_model
            )));
        }

        if self.prompt.max_context_bytes == 0 || self.prompt.max_question_bytes == 0 {
            return Err(PdfAskError::config("Prompt budgets must be positive"));
        }

        if self.upload.max_pages == 0 {
            return Err(PdfAskError::config("upload.max_pages must be positive"));
        }

        if self.stream.channel_capacity == 0 {
            return Err(PdfAskError::config("stream.channel_capacity must be positive"));
        }

        Ok(())
    }

    /// Socket address string for the HTTP listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = PdfAskConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.upload.max_pages, 10);
        assert_eq!(config.port, 5001);
    }

    #[test]
    fn test_config_validation_unknown_default() {
        let mut config = PdfAskConfig::default();
        config.models.default_model = "missing".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_duplicate_ids() {
        let mut config = PdfAskConfig::default();
        let dup = config.models.entries[0].clone();
        config.models.entries.push(dup);

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_http_backend_requires_url() {
        let mut config = PdfAskConfig::default();
        config.models.entries[1].model_reference = "models/gemma.gguf".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_http_backend_rejects_tls_endpoint() {
        let mut config = PdfAskConfig::default();
        config.models.entries[1].model_reference = "https://localhost:8080/completion".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("only plain http://"));
    }

    #[test]
    fn test_backend_defaults() {
        let config = PdfAskConfig::default();
        let tiny = &config.models.entries[0];
        let gemma = &config.models.entries[1];

        assert_eq!(tiny.timeout(), Duration::from_secs(45));
        assert_eq!(tiny.template(), PromptTemplate::Plain);
        assert_eq!(tiny.command().program, "ollama");
        assert_eq!(gemma.timeout(), Duration::from_secs(180));
        assert_eq!(gemma.template(), PromptTemplate::Gemma);
        assert_eq!(gemma.context_budget(6000), 8000);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
port: 6001
models:
  default_model: local
  entries:
    - id: local
      display_name: Local
      backend: stdin_process
      model_reference: models/tiny.gguf
      timeout_secs: 10
      command:
        program: llama-cli
        args: ["-m", "{{model}}", "-n", "{{max_tokens}}"]
upload:
  max_pages: 3
"#
        )
        .unwrap();

        let config = PdfAskConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 6001);
        assert_eq!(config.upload.max_pages, 3);
        assert_eq!(config.models.entries[0].timeout(), Duration::from_secs(10));
        assert_eq!(config.models.entries[0].sampling, SamplingParams::default());
        assert_eq!(config.stream.timeout_notice, TimeoutNotice::Always);
    }

    #[test]
    fn test_load_layered_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
port: 7001
stream:
  timeout_notice: when_empty
"#
        )
        .unwrap();

        let config = PdfAskConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.stream.timeout_notice, TimeoutNotice::WhenEmpty);
        assert_eq!(config.models.default_model, "tinyllama");
    }
}
