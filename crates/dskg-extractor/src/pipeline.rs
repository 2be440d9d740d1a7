//! Extraction pipeline orchestration
//!
//! ```text
//! Idle -> ModelLoading -> OntologyLoading -> DocumentLoading
//!      -> for each chunk: Extracting -> Validating -> Merging
//!      -> Done
//! ```
//!
//! Chunks are processed strictly in order. Validation always runs, whether
//! or not extraction succeeded or produced candidates. A chunk whose
//! generation fails recoverably contributes nothing and the loop moves on.
//! The accumulator is persisted after every chunk.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dskg_core::{
    ConstrainedSchema, DocumentSource, DskgError, FileOntologySource, GenerationParams,
    OntologySource, PipelineConfig, Result, Triple,
};
use dskg_llm::ConstrainedGenerator;
use dskg_parser::{chunk, ChunkConfig, ParserRegistry};
use serde::Serialize;
use uuid::Uuid;

use crate::output::{ResultSink, ResultSnapshot};
use crate::prompt::PromptBuilder;
use crate::schema::SchemaCompiler;
use crate::summary::OntologySummarizer;

// ============================================================================
// State and Reporting
// ============================================================================

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "chunk", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    ModelLoading,
    OntologyLoading,
    DocumentLoading,
    Extracting(usize),
    Validating(usize),
    Merging(usize),
    Done,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::ModelLoading => write!(f, "model_loading"),
            Self::OntologyLoading => write!(f, "ontology_loading"),
            Self::DocumentLoading => write!(f, "document_loading"),
            Self::Extracting(i) => write!(f, "extracting[{i}]"),
            Self::Validating(i) => write!(f, "validating[{i}]"),
            Self::Merging(i) => write!(f, "merging[{i}]"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Generation stage within a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Validation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extraction => write!(f, "extraction"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

/// Recoverable failure that emptied a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkFailure {
    pub stage: Stage,
    pub error: String,
}

/// What one chunk contributed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkOutcome {
    /// Chunk index (0-based)
    pub index: usize,

    /// Triples proposed by the extraction call
    pub candidates: usize,

    /// Triples merged into the results
    pub accepted: usize,

    /// Set when a generation call failed
    pub failure: Option<ChunkFailure>,
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub total_chunks: usize,
    pub chunk_outcomes: Vec<ChunkOutcome>,
    pub triples: Vec<Triple>,
    pub final_state: PipelineState,
}

impl RunReport {
    /// Chunks that ended with a recoverable failure
    pub fn failed_chunks(&self) -> usize {
        self.chunk_outcomes
            .iter()
            .filter(|o| o.failure.is_some())
            .count()
    }
}

// ============================================================================
// Options
// ============================================================================

/// Per-run pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Chunk width in characters
    pub chunk_size: usize,

    /// Requested overlap; reduced to a fifth of the chunk when too large
    pub chunk_overlap: usize,

    /// Deadline for each generation call
    pub generation_timeout: Option<Duration>,

    /// Keep only validated triples whose evidence occurs in the chunk
    pub require_grounded_text: bool,

    /// Decoding parameters for both calls
    pub generation: GenerationParams,
}

impl PipelineOptions {
    pub fn from_config(pipeline: &PipelineConfig, generation: GenerationParams) -> Self {
        Self {
            chunk_size: pipeline.chunk_size,
            chunk_overlap: pipeline.chunk_overlap,
            generation_timeout: pipeline.generation_timeout_secs.map(Duration::from_secs),
            require_grounded_text: pipeline.require_grounded_text,
            generation,
        }
    }

    fn chunk_config(&self) -> Result<ChunkConfig> {
        let pipeline = PipelineConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            ..Default::default()
        };
        let overlap = pipeline.effective_overlap();
        if overlap != self.chunk_overlap {
            tracing::warn!(
                chunk_size = self.chunk_size,
                requested = self.chunk_overlap,
                overlap,
                "Chunk overlap must be smaller than the chunk size; reduced"
            );
        }

        ChunkConfig::new(self.chunk_size, overlap).map_err(|e| DskgError::Config(e.to_string()))
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default(), GenerationParams::default())
    }
}

// ============================================================================
// Validation Filter
// ============================================================================

/// Keep validated triples that are backed by the candidates and the chunk
///
/// A triple is dropped when its relation was not among the candidates, or,
/// with `require_grounded`, when its evidence does not occur in the chunk.
pub fn accept_validated(
    candidates: &[Triple],
    validated: Vec<Triple>,
    chunk_text: &str,
    require_grounded: bool,
) -> Vec<Triple> {
    let relations: BTreeSet<&str> = candidates.iter().map(|t| t.relation.as_str()).collect();

    validated
        .into_iter()
        .filter(|t| {
            if !relations.contains(t.relation.as_str()) {
                tracing::debug!(triple = %t, "Dropped: relation not among candidates");
                return false;
            }
            if require_grounded && !t.is_grounded_in(chunk_text) {
                tracing::debug!(triple = %t, "Dropped: evidence not found in chunk");
                return false;
            }
            true
        })
        .collect()
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives a document through extraction and validation
pub struct PipelineOrchestrator {
    generator: ConstrainedGenerator,
    sink: Arc<dyn ResultSink>,
    documents: Arc<dyn DocumentSource>,
    ontologies: Arc<dyn OntologySource>,
    prompts: PromptBuilder,
    summarizer: OntologySummarizer,
    options: PipelineOptions,
    state: PipelineState,
}

/// Read-only context shared by every chunk of a run
struct RunContext<'a> {
    summary: &'a str,
    schema: &'a ConstrainedSchema,
}

impl PipelineOrchestrator {
    /// Orchestrator reading documents with the default parsers and ontologies from files
    pub fn new(generator: ConstrainedGenerator, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            generator,
            sink,
            documents: Arc::new(ParserRegistry::with_defaults()),
            ontologies: Arc::new(FileOntologySource),
            prompts: PromptBuilder::new(),
            summarizer: OntologySummarizer::new(),
            options: PipelineOptions::default(),
            state: PipelineState::Idle,
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_document_source(mut self, documents: Arc<dyn DocumentSource>) -> Self {
        self.documents = documents;
        self
    }

    pub fn with_ontology_source(mut self, ontologies: Arc<dyn OntologySource>) -> Self {
        self.ontologies = ontologies;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_summarizer(mut self, summarizer: OntologySummarizer) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!(from = %self.state, to = %next, "Pipeline state");
        self.state = next;
    }

    /// Run the whole pipeline for one document
    ///
    /// Fatal errors (model, ontology, document, persistence) abort the run.
    pub async fn run(&mut self, document: &Path, ontology: &Path) -> Result<RunReport> {
        let result = self.run_inner(document, ontology).await;
        if let Err(e) = &result {
            tracing::error!(state = %self.state, error = %e, "Pipeline failed");
            self.transition(PipelineState::Failed);
        }
        result
    }

    async fn run_inner(&mut self, document: &Path, ontology: &Path) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        tracing::info!(
            %run_id,
            document = %document.display(),
            ontology = %ontology.display(),
            model = self.generator.model(),
            "=== Starting ontology extraction pipeline ==="
        );

        let chunk_config = self.options.chunk_config()?;

        self.transition(PipelineState::ModelLoading);
        self.generator.load().await?;

        self.transition(PipelineState::OntologyLoading);
        let ontology_schema = self.ontologies.load(ontology)?;
        let summary = self.summarizer.summarize(&ontology_schema);
        let schema = SchemaCompiler::compile(&ontology_schema);
        tracing::info!(
            classes = ontology_schema.class_count(),
            properties = ontology_schema.property_count(),
            summary_chars = summary.len(),
            "Ontology loaded"
        );

        self.transition(PipelineState::DocumentLoading);
        let text = self.documents.extract_text(document)?;
        let chunks = chunk(&text, &chunk_config);
        let total_chunks = chunks.total();
        tracing::info!(
            chars = chunks.text_len(),
            total_chunks,
            chunk_size = chunk_config.chunk_size,
            overlap = chunk_config.overlap,
            "Document split into chunks"
        );

        let context = RunContext {
            summary: &summary,
            schema: &schema,
        };
        let document_name = document.display().to_string();
        let mut triples: Vec<Triple> = Vec::new();
        let mut outcomes = Vec::with_capacity(total_chunks);

        for c in chunks {
            tracing::info!("Processing chunk {}/{}...", c.index + 1, total_chunks);

            let (accepted, outcome) = self.process_chunk(c.index, c.text, &context).await?;
            tracing::info!("Chunk {} extracted: {}", c.index + 1, outcome.accepted);

            triples.extend(accepted);
            outcomes.push(outcome);

            self.sink.persist(&ResultSnapshot {
                run_id,
                document: &document_name,
                model: self.generator.model(),
                chunks_processed: c.index + 1,
                total_chunks,
                updated_at: Utc::now(),
                triples: &triples,
            })?;
        }

        self.transition(PipelineState::Done);
        let report = RunReport {
            run_id,
            total_chunks,
            chunk_outcomes: outcomes,
            triples,
            final_state: self.state,
        };
        tracing::info!(
            triples = report.triples.len(),
            failed_chunks = report.failed_chunks(),
            "Done"
        );
        Ok(report)
    }

    /// Extract, validate and filter one chunk
    ///
    /// Validation runs even when extraction failed; the chunk then contributes
    /// nothing, since no validated relation can match an empty candidate list.
    async fn process_chunk(
        &mut self,
        index: usize,
        text: &str,
        context: &RunContext<'_>,
    ) -> Result<(Vec<Triple>, ChunkOutcome)> {
        let mut outcome = ChunkOutcome {
            index,
            candidates: 0,
            accepted: 0,
            failure: None,
        };

        self.transition(PipelineState::Extracting(index));
        let prompt = self.prompts.build_extraction_prompt(text, context.summary);
        let candidates = match self.call(Stage::Extraction, &prompt, context.schema).await {
            Ok(candidates) => candidates,
            Err(e) => {
                Self::record(&mut outcome, Stage::Extraction, e)?;
                Vec::new()
            }
        };
        outcome.candidates = candidates.len();

        self.transition(PipelineState::Validating(index));
        let prompt = self
            .prompts
            .build_validation_prompt(&candidates, text, context.summary);
        let validated = match self.call(Stage::Validation, &prompt, context.schema).await {
            Ok(validated) => validated,
            Err(e) => {
                Self::record(&mut outcome, Stage::Validation, e)?;
                Vec::new()
            }
        };

        self.transition(PipelineState::Merging(index));
        let accepted = accept_validated(
            &candidates,
            validated,
            text,
            self.options.require_grounded_text,
        );
        outcome.accepted = accepted.len();
        Ok((accepted, outcome))
    }

    /// Note a recoverable failure on the chunk; anything else is fatal
    ///
    /// The first failure of a chunk is the one reported.
    fn record(outcome: &mut ChunkOutcome, stage: Stage, error: DskgError) -> Result<()> {
        if !error.is_recoverable() {
            return Err(error);
        }

        tracing::warn!(
            chunk = outcome.index + 1,
            %stage,
            error = %error,
            "Generation failed; chunk contributes no triples"
        );
        if outcome.failure.is_none() {
            outcome.failure = Some(ChunkFailure {
                stage,
                error: error.to_string(),
            });
        }
        Ok(())
    }

    /// One generation call under the optional deadline
    async fn call(
        &self,
        stage: Stage,
        prompt: &str,
        schema: &ConstrainedSchema,
    ) -> Result<Vec<Triple>> {
        tracing::debug!(%stage, prompt_chars = prompt.len(), "Calling generator");
        let params = &self.options.generation;
        let generation = self.generator.generate_triples(prompt, schema, params);

        match self.options.generation_timeout {
            Some(deadline) => tokio::time::timeout(deadline, generation)
                .await
                .map_err(|_| DskgError::Timeout {
                    stage: stage.to_string(),
                    secs: deadline.as_secs(),
                })?,
            None => generation.await,
        }
    }
}
