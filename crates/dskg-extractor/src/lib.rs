//! dskg Extractor - Ontology-guided triple extraction pipeline
//!
//! Turns a datasheet into ontology-aligned triples:
//! - `summary`: renders the ontology into a prompt-sized dictionary
//! - `schema`: compiles the ontology into the constrained output schema
//! - `prompt`: extraction and validation prompts with few-shot examples
//! - `pipeline`: the per-chunk extract, validate, merge loop
//! - `output`: sinks receiving the accumulated triples after every chunk

pub mod output;
pub mod pipeline;
pub mod prompt;
pub mod schema;
pub mod summary;

pub use output::{FileSink, MemorySink, PersistedResults, ResultSink, ResultSnapshot};
pub use pipeline::{
    accept_validated, ChunkFailure, ChunkOutcome, PipelineOptions, PipelineOrchestrator,
    PipelineState, RunReport, Stage,
};
pub use prompt::{default_examples, FewShotExample, PromptBuilder};
pub use schema::SchemaCompiler;
pub use summary::{OntologySummarizer, CYCLE_MARKER, SHARED_MARKER};
