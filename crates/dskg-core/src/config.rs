//! dskg Configuration Management
//!
//! Handles configuration from environment variables, config files,
//! and command-line arguments with sensible defaults for local runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// LLM backend configuration
    pub llm: LlmConfig,

    /// Extraction pipeline configuration
    pub pipeline: PipelineConfig,

    /// Input and output locations
    pub paths: PathsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Load the file named by `DSKG_CONFIG` (if any), then apply the environment
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var("DSKG_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path)?.with_env_override(),
            _ => Self::from_env(),
        }
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // LLM
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            self.llm.ollama_url = url;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.llm.openai_base_url = Some(url);
        }
        if let Some(t) = parse_env("LLM_TEMPERATURE")? {
            self.llm.temperature = t;
        }
        if let Some(p) = parse_env("LLM_REPETITION_PENALTY")? {
            self.llm.repetition_penalty = p;
        }
        if let Some(secs) = parse_env("LLM_TIMEOUT_SECS")? {
            self.llm.timeout_secs = secs;
        }

        // Pipeline
        if let Some(overlap) = parse_env("CHUNK_OVERLAP")? {
            self.pipeline.chunk_overlap = overlap;
        }
        if let Some(secs) = parse_env("GENERATION_TIMEOUT_SECS")? {
            self.pipeline.generation_timeout_secs = Some(secs);
        }

        // Paths
        if let Ok(dir) = std::env::var("DOCUMENT_DIR") {
            self.paths.document_dir = dir.into();
        }
        if let Ok(dir) = std::env::var("ONTOLOGY_DIR") {
            self.paths.ontology_dir = dir.into();
        }
        if let Ok(dir) = std::env::var("OUTPUT_DIR") {
            self.paths.output_dir = dir.into();
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parse_env("LOG_JSON")? {
            self.logging.json_format = json;
        }

        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "chunk_size".to_string(),
                value: "0".to_string(),
            });
        }
        if self.llm.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_tokens".to_string(),
                value: "0".to_string(),
            });
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::MissingRequired("llm.model".to_string()));
        }
        if self.llm.provider == LlmProvider::OpenAI && self.llm.openai_api_key.is_none() {
            return Err(ConfigError::MissingRequired("OPENAI_API_KEY".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// LLM backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend to use
    pub provider: LlmProvider,

    /// Ollama server URL
    pub ollama_url: String,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (for compatible servers such as vLLM)
    pub openai_base_url: Option<String>,

    /// Model name to use
    pub model: String,

    /// Maximum new tokens per generation call
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Repetition penalty (1.0 disables it)
    pub repetition_penalty: f32,

    /// HTTP request timeout in seconds
    pub timeout_secs: u64,

    /// Free model memory on the backend after every call
    pub release_after_call: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            ollama_url: "http://localhost:11434".to_string(),
            openai_api_key: None,
            openai_base_url: None,
            model: "qwen2.5:7b-instruct".to_string(),
            max_tokens: 300,
            temperature: 0.2,
            repetition_penalty: 1.1,
            timeout_secs: 600,
            release_after_call: true,
        }
    }
}

/// Supported LLM backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    OpenAI,
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Extraction pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chunk size in characters
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters
    pub chunk_overlap: usize,

    /// Deadline for a single generation call
    pub generation_timeout_secs: Option<u64>,

    /// Drop validated triples whose evidence is not found in the chunk
    pub require_grounded_text: bool,
}

impl PipelineConfig {
    /// Overlap actually used for a run.
    ///
    /// An overlap that does not leave a positive step is reduced to a fifth
    /// of the chunk size.
    pub fn effective_overlap(&self) -> usize {
        if self.chunk_overlap < self.chunk_size {
            self.chunk_overlap
        } else {
            self.chunk_size / 5
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 200,
            generation_timeout_secs: None,
            require_grounded_text: true,
        }
    }
}

/// Input and output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory searched for source documents
    pub document_dir: PathBuf,

    /// Directory searched for ontology files
    pub ontology_dir: PathBuf,

    /// Directory receiving result files
    pub output_dir: PathBuf,
}

impl PathsConfig {
    /// Resolve a document name given on the command line
    pub fn resolve_document(&self, name: &str) -> PathBuf {
        resolve_in(&self.document_dir, name)
    }

    /// Resolve an ontology name given on the command line
    pub fn resolve_ontology(&self, name: &str) -> PathBuf {
        resolve_in(&self.ontology_dir, name)
    }

    /// Result file for an output label
    pub fn output_file(&self, label: &str) -> PathBuf {
        self.output_dir.join(format!("triples_{label}.json"))
    }
}

fn resolve_in(dir: &Path, name: &str) -> PathBuf {
    let direct = PathBuf::from(name);
    if direct.exists() || direct.is_absolute() {
        direct
    } else {
        dir.join(name)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            document_dir: PathBuf::from("Data/PdfFiles"),
            ontology_dir: PathBuf::from("Data/Ontologies"),
            output_dir: PathBuf::from("Results"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline.chunk_size, 1500);
        assert_eq!(config.pipeline.chunk_overlap, 200);
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_llm_provider_parse() {
        assert_eq!(
            "ollama".parse::<LlmProvider>().unwrap(),
            LlmProvider::Ollama
        );
        assert_eq!(
            "OpenAI".parse::<LlmProvider>().unwrap(),
            LlmProvider::OpenAI
        );
        assert!("invalid".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_effective_overlap() {
        let mut pipeline = PipelineConfig::default();
        assert_eq!(pipeline.effective_overlap(), 200);

        pipeline.chunk_size = 200;
        assert_eq!(pipeline.effective_overlap(), 40);

        pipeline.chunk_size = 100;
        pipeline.chunk_overlap = 0;
        assert_eq!(pipeline.effective_overlap(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.pipeline.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.llm.provider = LlmProvider::OpenAI;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dskg.toml");
        std::fs::write(
            &path,
            r#"
[llm]
model = "llama3.1:8b"

[pipeline]
chunk_overlap = 100
"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.llm.model, "llama3.1:8b");
        assert_eq!(config.llm.ollama_url, "http://localhost:11434");
        assert_eq!(config.pipeline.chunk_overlap, 100);
        assert_eq!(config.pipeline.chunk_size, 1500);
    }

    #[test]
    fn test_path_resolution() {
        let paths = PathsConfig::default();
        assert_eq!(
            paths.resolve_document("p1.pdf"),
            PathBuf::from("Data/PdfFiles/p1.pdf")
        );
        assert_eq!(
            paths.output_file("run1"),
            PathBuf::from("Results/triples_run1.json")
        );

        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("onto.json");
        std::fs::write(&existing, "{}").unwrap();
        let name = existing.to_str().unwrap();
        assert_eq!(paths.resolve_ontology(name), existing);
    }
}
