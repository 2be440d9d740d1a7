//! dskg Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout dskg:
//! - Ontology registry (classes, typed properties, primitive kinds)
//! - Extracted triples and the constrained output schema they must satisfy
//! - The error taxonomy (fatal vs. recoverable-per-chunk)
//! - Collaborator traits for generation backends, documents and ontologies
//! - Configuration management

pub mod config;
pub mod ontology;
pub mod schema;

pub use config::{
    AppConfig, ConfigError, LlmConfig, LlmProvider, LoggingConfig, PathsConfig, PipelineConfig,
};
pub use ontology::{
    FileOntologySource, OntologyClass, OntologyDefinition, OntologyError, OntologyProperty,
    OntologySchema, Primitive, Range,
};
pub use schema::{ConstrainedSchema, SchemaViolation, TRIPLE_FIELDS};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for dskg operations
///
/// Fatal variants abort the run and name the stage and resource that failed.
/// See [`DskgError::is_recoverable`] for the per-chunk subset.
#[derive(Error, Debug)]
pub enum DskgError {
    #[error("Failed to load model '{model}': {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("Failed to load ontology {path}: {reason}")]
    Ontology { path: PathBuf, reason: String },

    #[error("Failed to read document {path}: {reason}")]
    Document { path: PathBuf, reason: String },

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Model output violates the constrained schema: {0}")]
    MalformedOutput(String),

    #[error("{stage} call exceeded deadline of {secs}s")]
    Timeout { stage: String, secs: u64 },

    #[error("Failed to persist results to {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DskgError {
    /// Whether this error only invalidates the current chunk.
    ///
    /// Backend hiccups, deadline overruns and schema violations skip the chunk;
    /// everything else stops the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Generation(_) | Self::MalformedOutput(_) | Self::Timeout { .. }
        )
    }

    /// Build a document error for a path
    pub fn document(path: impl AsRef<Path>, reason: impl std::fmt::Display) -> Self {
        Self::Document {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Build an ontology error for a path
    pub fn ontology(path: impl AsRef<Path>, reason: impl std::fmt::Display) -> Self {
        Self::Ontology {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

impl From<SchemaViolation> for DskgError {
    fn from(violation: SchemaViolation) -> Self {
        Self::MalformedOutput(violation.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DskgError>;

// ============================================================================
// Triples
// ============================================================================

/// A single extracted fact aligned with the ontology
///
/// `used_text` is the span of the chunk the fact was read from. Earlier
/// outputs spelled it `Used_text`, which is still accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    /// Verbatim evidence from the source chunk
    #[serde(alias = "Used_text")]
    pub used_text: String,

    /// Head entity (canonical identifier)
    pub head: String,

    /// Ontology class of the head entity
    pub head_type: String,

    /// Ontology property linking head and tail
    pub relation: String,

    /// Tail entity or literal value
    pub tail: String,

    /// Ontology class or primitive marker of the tail
    pub tail_type: String,
}

impl Triple {
    /// Create a new triple
    pub fn new(
        used_text: impl Into<String>,
        head: impl Into<String>,
        head_type: impl Into<String>,
        relation: impl Into<String>,
        tail: impl Into<String>,
        tail_type: impl Into<String>,
    ) -> Self {
        Self {
            used_text: used_text.into(),
            head: head.into(),
            head_type: head_type.into(),
            relation: relation.into(),
            tail: tail.into(),
            tail_type: tail_type.into(),
        }
    }

    /// Check whether `used_text` occurs in `chunk_text`.
    ///
    /// Runs of whitespace are collapsed on both sides, since PDF text keeps
    /// hard line breaks that models routinely rewrite as spaces.
    pub fn is_grounded_in(&self, chunk_text: &str) -> bool {
        let evidence = collapse_whitespace(&self.used_text);
        if evidence.is_empty() {
            return false;
        }
        collapse_whitespace(chunk_text).contains(&evidence)
    }
}

impl std::fmt::Display for Triple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}: {}) -[{}]-> ({}: {})",
            self.head, self.head_type, self.relation, self.tail, self.tail_type
        )
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Generation
// ============================================================================

/// Decoding parameters passed with every generation call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Maximum number of new tokens
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Penalty applied to repeated tokens (1.0 = none)
    pub repetition_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 300,
            temperature: 0.2,
            repetition_penalty: 1.1,
        }
    }
}

impl From<&LlmConfig> for GenerationParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            repetition_penalty: config.repetition_penalty,
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for language model backends
///
/// Backends enforce the schema at decoding time where they can. The
/// `ConstrainedGenerator` in `dskg-llm` re-checks every output, so a backend
/// may return fenced or slightly off output without breaking the contract.
#[async_trait::async_trait]
pub trait LlmBackend: Send + Sync {
    /// Make sure the model is available. Failure is fatal for the run.
    async fn load(&self) -> Result<()>;

    /// Generate raw text for a prompt under a constrained schema
    async fn complete(
        &self,
        prompt: &str,
        schema: &ConstrainedSchema,
        params: &GenerationParams,
    ) -> Result<String>;

    /// Model identifier used by this backend
    fn model(&self) -> &str;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Supplies the plain text of a source document
pub trait DocumentSource: Send + Sync {
    /// Extract the text of `path`, pages joined with `\n`
    fn extract_text(&self, path: &Path) -> Result<String>;
}

/// Supplies the ontology a run is validated against
pub trait OntologySource: Send + Sync {
    /// Load the ontology at `path`
    fn load(&self, path: &Path) -> Result<OntologySchema>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn voltage_triple() -> Triple {
        Triple::new(
            "nominal voltage of 3.6V",
            "Cell",
            "BatteryCell",
            "hasNominalVoltage",
            "3.6",
            "float",
        )
    }

    #[test]
    fn test_triple_accepts_legacy_used_text_key() {
        let json = r#"{
            "Used_text": "nominal voltage of 3.6V",
            "head": "Cell",
            "head_type": "BatteryCell",
            "relation": "hasNominalVoltage",
            "tail": "3.6",
            "tail_type": "float"
        }"#;

        let triple: Triple = serde_json::from_str(json).unwrap();
        assert_eq!(triple, voltage_triple());

        let out = serde_json::to_value(&triple).unwrap();
        assert!(out.get("used_text").is_some());
        assert!(out.get("Used_text").is_none());
    }

    #[test]
    fn test_grounding_collapses_whitespace() {
        let triple = voltage_triple();
        assert!(triple.is_grounded_in("The cell has a nominal voltage of 3.6V."));
        assert!(triple.is_grounded_in("The cell has a nominal\nvoltage  of 3.6V."));
        assert!(!triple.is_grounded_in("The cell has a nominal voltage of 3.7V."));
    }

    #[test]
    fn test_empty_evidence_is_not_grounded() {
        let mut triple = voltage_triple();
        triple.used_text = "   ".to_string();
        assert!(!triple.is_grounded_in("anything"));
    }

    #[test]
    fn test_error_recoverability() {
        assert!(DskgError::MalformedOutput("x".into()).is_recoverable());
        assert!(DskgError::Generation("x".into()).is_recoverable());
        assert!(DskgError::Timeout {
            stage: "validation".into(),
            secs: 5
        }
        .is_recoverable());

        assert!(!DskgError::ModelLoad {
            model: "m".into(),
            reason: "missing".into()
        }
        .is_recoverable());
        assert!(!DskgError::ontology("onto.json", "bad").is_recoverable());
        assert!(!DskgError::document("doc.pdf", "unreadable").is_recoverable());
    }

    #[test]
    fn test_fatal_errors_name_the_resource() {
        let err = DskgError::ontology("Data/Ontologies/cells.json", "no classes");
        let msg = err.to_string();
        assert!(msg.contains("cells.json"));
        assert!(msg.contains("no classes"));

        let err = DskgError::ModelLoad {
            model: "qwen2.5:7b".into(),
            reason: "not found".into(),
        };
        assert!(err.to_string().contains("qwen2.5:7b"));
    }

    #[test]
    fn test_generation_params_from_config() {
        let config = LlmConfig {
            max_tokens: 512,
            ..Default::default()
        };
        let params = GenerationParams::from(&config);
        assert_eq!(params.max_tokens, 512);
        assert_eq!(params.temperature, config.temperature);
        assert_eq!(params.repetition_penalty, config.repetition_penalty);
    }
}
