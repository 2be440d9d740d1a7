//! dskg CLI - Datasheet triple extraction
//!
//! Usage:
//!   dskg <model> <document> <ontology> <chunk_size> <output_label> <max_new_tokens>
//!
//! Everything else comes from `DSKG_CONFIG` and the environment.

use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dskg_core::{AppConfig, GenerationParams, LoggingConfig};
use dskg_extractor::{FileSink, PipelineOptions, PipelineOrchestrator};
use dskg_llm::{create_backend, ConstrainedGenerator};

#[derive(Parser)]
#[command(name = "dskg")]
#[command(about = "Extract ontology-aligned triples from a battery datasheet")]
#[command(version)]
struct Cli {
    /// Model identifier, e.g. qwen2.5:7b-instruct
    model: String,

    /// Source document, as a path or a name inside the document directory
    document: String,

    /// Ontology file, as a path or a name inside the ontology directory
    ontology: String,

    /// Chunk width in characters
    chunk_size: NonZeroUsize,

    /// Label for the results file (`triples_<label>.json`)
    output_label: String,

    /// Maximum new tokens per generation call
    max_new_tokens: NonZeroU32,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.as_str().into());

    if logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load().context("failed to load configuration")?;
    config.llm.model = cli.model;
    config.llm.max_tokens = cli.max_new_tokens.get();
    config.pipeline.chunk_size = cli.chunk_size.get();
    config.validate().context("invalid configuration")?;

    init_tracing(&config.logging);

    let document = config.paths.resolve_document(&cli.document);
    let ontology = config.paths.resolve_ontology(&cli.ontology);
    let output = config.paths.output_file(&cli.output_label);

    tracing::info!(
        provider = ?config.llm.provider,
        model = %config.llm.model,
        max_tokens = config.llm.max_tokens,
        chunk_size = config.pipeline.chunk_size,
        output = %output.display(),
        "Configuration loaded"
    );

    let backend = create_backend(&config.llm).context("failed to create generation backend")?;
    let generator = ConstrainedGenerator::new(backend);
    let options =
        PipelineOptions::from_config(&config.pipeline, GenerationParams::from(&config.llm));

    let mut pipeline = PipelineOrchestrator::new(generator, Arc::new(FileSink::new(&output)))
        .with_options(options);

    let report = pipeline
        .run(&document, &ontology)
        .await
        .with_context(|| format!("extraction failed for {}", document.display()))?;

    tracing::info!(
        run_id = %report.run_id,
        chunks = report.total_chunks,
        failed_chunks = report.failed_chunks(),
        triples = report.triples.len(),
        output = %output.display(),
        "Extraction complete"
    );

    Ok(())
}
