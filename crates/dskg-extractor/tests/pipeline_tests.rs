//! Pipeline Integration Tests
//!
//! Every test drives the full orchestrator against the scripted mock
//! backend and the bundled battery-cell ontology.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dskg_core::{
    DocumentSource, DskgError, GenerationParams, OntologySchema, OntologySource, Result, Triple,
};
use dskg_extractor::{
    FileSink, MemorySink, PipelineOptions, PipelineOrchestrator, PipelineState, ResultSink, Stage,
};
use dskg_llm::{ConstrainedGenerator, MockBackend, MockReply};

/// Serves a fixed text regardless of path
struct StaticDocument(String);

impl DocumentSource for StaticDocument {
    fn extract_text(&self, _path: &Path) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Serves the bundled battery-cell ontology regardless of path
struct BundledOntology;

impl OntologySource for BundledOntology {
    fn load(&self, path: &Path) -> Result<OntologySchema> {
        OntologySchema::battery_cell().map_err(|e| DskgError::ontology(path, e))
    }
}

const DOCUMENT: &str = "nominal voltage 3.6V and nominal capacity 3000 mAh";

fn voltage() -> Triple {
    Triple::new(
        "nominal voltage 3.6V",
        "Cell",
        "BatteryCell",
        "hasNominalVoltage",
        "3.6",
        "float",
    )
}

fn capacity() -> Triple {
    Triple::new(
        "capacity 3000 mAh",
        "Cell",
        "BatteryCell",
        "hasNominalCapacity",
        "3000",
        "float",
    )
}

fn json(triples: &[Triple]) -> MockReply {
    MockReply::text(serde_json::to_string(triples).unwrap())
}

fn small_chunks() -> PipelineOptions {
    PipelineOptions {
        chunk_size: 20,
        chunk_overlap: 5,
        generation_timeout: None,
        require_grounded_text: true,
        generation: GenerationParams::default(),
    }
}

fn orchestrator(
    backend: &MockBackend,
    text: &str,
    sink: Arc<dyn ResultSink>,
    options: PipelineOptions,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(ConstrainedGenerator::new(Arc::new(backend.clone())), sink)
        .with_document_source(Arc::new(StaticDocument(text.to_string())))
        .with_ontology_source(Arc::new(BundledOntology))
        .with_options(options)
}

async fn run(pipeline: &mut PipelineOrchestrator) -> Result<dskg_extractor::RunReport> {
    pipeline
        .run(Path::new("p1.pdf"), Path::new("battery_cell.json"))
        .await
}

// =============================================================================
// End-to-end
// =============================================================================

#[tokio::test]
async fn test_end_to_end_small_document() {
    let backend = MockBackend::new()
        .with_reply(json(&[voltage()]))
        .with_reply(json(&[voltage()]))
        .with_reply(json(&[]))
        .with_reply(json(&[]))
        .with_reply(json(&[capacity()]))
        .with_reply(json(&[capacity()]));
    let sink = MemorySink::new();

    let mut pipeline = orchestrator(&backend, DOCUMENT, Arc::new(sink.clone()), small_chunks());
    let report = run(&mut pipeline).await.unwrap();

    assert_eq!(report.total_chunks, 3);
    assert_eq!(report.final_state, PipelineState::Done);
    assert_eq!(pipeline.state(), PipelineState::Done);
    assert_eq!(report.triples, vec![voltage(), capacity()]);
    assert_eq!(report.failed_chunks(), 0);

    // extraction and validation for every chunk, including the empty one
    assert_eq!(backend.call_count(), 6);

    let prompts = backend.prompts();
    assert!(prompts[0].contains("\"\"\"nominal voltage 3.6V\"\"\""));
    assert!(prompts[2].contains("\"\"\" 3.6V and nominal ca\"\"\""));
    assert!(prompts[4].contains("\"\"\"al capacity 3000 mAh\"\"\""));
    assert!(prompts[1].contains("Candidate triples:"));
    assert!(prompts[3].contains("Candidate triples:\n[]"));
}

#[tokio::test]
async fn test_grounded_triple_kept_unchanged() {
    let triple = Triple::new(
        "nominal voltage of 3.6V",
        "Cell",
        "BatteryCell",
        "hasNominalVoltage",
        "3.6",
        "float",
    );
    let backend = MockBackend::new()
        .with_reply(json(&[triple.clone()]))
        .with_reply(json(&[triple.clone()]));
    let sink = MemorySink::new();

    let mut pipeline = orchestrator(
        &backend,
        "nominal voltage of 3.6V",
        Arc::new(sink.clone()),
        PipelineOptions::default(),
    );
    let report = run(&mut pipeline).await.unwrap();

    assert_eq!(report.total_chunks, 1);
    assert_eq!(report.triples, vec![triple.clone()]);
    assert_eq!(sink.latest().unwrap().triples, vec![triple]);
}

// =============================================================================
// Per-chunk failures
// =============================================================================

#[tokio::test]
async fn test_malformed_validation_output_yields_nothing() {
    let backend = MockBackend::new()
        .with_reply(json(&[voltage()]))
        .with_reply(MockReply::text("Here are the triples: none"));
    let sink = MemorySink::new();

    let mut pipeline = orchestrator(
        &backend,
        "nominal voltage 3.6V",
        Arc::new(sink.clone()),
        PipelineOptions::default(),
    );
    let report = run(&mut pipeline).await.unwrap();

    assert!(report.triples.is_empty());
    assert_eq!(report.final_state, PipelineState::Done);

    let outcome = &report.chunk_outcomes[0];
    assert_eq!(outcome.candidates, 1);
    assert_eq!(outcome.accepted, 0);
    assert_eq!(outcome.failure.as_ref().unwrap().stage, Stage::Validation);

    // the chunk still counts as processed
    assert_eq!(sink.latest().unwrap().chunks_processed, 1);
}

#[tokio::test]
async fn test_extraction_schema_violation_still_validates() {
    let off_schema = r#"[{"used_text":"3.6V","head":"Cell","head_type":"BatteryCell","relation":"hasAuthor","tail":"x","tail_type":"str"}]"#;
    let backend = MockBackend::new()
        .with_reply(MockReply::text(off_schema))
        .with_reply(json(&[voltage()]))
        .with_reply(json(&[]))
        .with_reply(json(&[]))
        .with_reply(json(&[capacity()]))
        .with_reply(json(&[capacity()]));
    let sink = MemorySink::new();

    let mut pipeline = orchestrator(&backend, DOCUMENT, Arc::new(sink.clone()), small_chunks());
    let report = run(&mut pipeline).await.unwrap();

    let outcome = &report.chunk_outcomes[0];
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::Extraction);
    assert!(failure.error.contains("hasAuthor"));
    assert_eq!(outcome.candidates, 0);
    assert_eq!(outcome.accepted, 0);

    // validation ran on chunk 0 with no candidates, and its output was discarded
    assert_eq!(backend.call_count(), 6);
    let prompts = backend.prompts();
    assert!(prompts[1].contains("Candidate triples:\n[]"));
    assert!(prompts[1].contains("\"\"\"nominal voltage 3.6V\"\"\""));

    assert_eq!(report.triples, vec![capacity()]);
    assert!(sink.snapshots()[0].triples.is_empty());
}

#[tokio::test]
async fn test_backend_error_contributes_nothing() {
    let backend = MockBackend::new()
        .with_reply(MockReply::error("CUDA out of memory"))
        .with_reply(json(&[]))
        .with_reply(json(&[voltage()]))
        .with_reply(json(&[voltage()]));
    let sink = MemorySink::new();

    let options = PipelineOptions {
        chunk_size: 20,
        chunk_overlap: 0,
        ..small_chunks()
    };
    let mut pipeline = orchestrator(
        &backend,
        "xxxxxxxxxxxxxxxxxxxxnominal voltage 3.6V",
        Arc::new(sink.clone()),
        options,
    );
    let report = run(&mut pipeline).await.unwrap();

    assert_eq!(report.total_chunks, 2);
    assert_eq!(report.failed_chunks(), 1);
    assert_eq!(backend.call_count(), 4);
    assert_eq!(report.triples, vec![voltage()]);
}

#[tokio::test]
async fn test_extraction_and_validation_failures_report_first() {
    let backend = MockBackend::new()
        .with_reply(MockReply::error("CUDA out of memory"))
        .with_reply(MockReply::text("not json"));
    let sink = MemorySink::new();

    let mut pipeline = orchestrator(
        &backend,
        "nominal voltage 3.6V",
        Arc::new(sink.clone()),
        PipelineOptions::default(),
    );
    let report = run(&mut pipeline).await.unwrap();

    let failure = report.chunk_outcomes[0].failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::Extraction);
    assert!(failure.error.contains("CUDA out of memory"));
    assert_eq!(backend.call_count(), 2);
    assert_eq!(report.final_state, PipelineState::Done);
}

#[tokio::test]
async fn test_generation_deadline_is_recoverable() {
    let backend = MockBackend::new()
        .with_reply(MockReply::delayed(Duration::from_millis(500), "[]"))
        .with_reply(json(&[]))
        .with_reply(json(&[voltage()]))
        .with_reply(json(&[voltage()]));
    let sink = MemorySink::new();

    let options = PipelineOptions {
        chunk_size: 20,
        chunk_overlap: 0,
        generation_timeout: Some(Duration::from_millis(50)),
        ..small_chunks()
    };
    let mut pipeline = orchestrator(
        &backend,
        "xxxxxxxxxxxxxxxxxxxxnominal voltage 3.6V",
        Arc::new(sink.clone()),
        options,
    );
    let report = run(&mut pipeline).await.unwrap();

    let failure = report.chunk_outcomes[0].failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::Extraction);
    assert!(failure.error.contains("deadline"));
    assert_eq!(report.triples, vec![voltage()]);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_snapshot_after_each_chunk_holds_accumulator() {
    let backend = MockBackend::new()
        .with_reply(json(&[voltage()]))
        .with_reply(json(&[voltage()]))
        .with_reply(json(&[]))
        .with_reply(json(&[]))
        .with_reply(json(&[capacity()]))
        .with_reply(json(&[capacity()]));
    let sink = MemorySink::new();

    let mut pipeline = orchestrator(&backend, DOCUMENT, Arc::new(sink.clone()), small_chunks());
    let report = run(&mut pipeline).await.unwrap();

    let snapshots = sink.snapshots();
    assert_eq!(snapshots.len(), 3);
    assert_eq!(snapshots[0].triples, vec![voltage()]);
    assert_eq!(snapshots[1].triples, vec![voltage()]);
    assert_eq!(snapshots[2].triples, vec![voltage(), capacity()]);

    for (i, snapshot) in snapshots.iter().enumerate() {
        assert_eq!(snapshot.chunks_processed, i + 1);
        assert_eq!(snapshot.total_chunks, 3);
        assert_eq!(snapshot.run_id, report.run_id);
        assert_eq!(snapshot.model, "mock-model");
    }
}

#[tokio::test]
async fn test_file_sink_holds_final_results() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSink::new(dir.path().join("Results").join("triples_run1.json"));
    let backend = MockBackend::new()
        .with_reply(json(&[voltage()]))
        .with_reply(json(&[voltage()]));

    let mut pipeline = orchestrator(
        &backend,
        "nominal voltage 3.6V",
        Arc::new(sink.clone()),
        PipelineOptions::default(),
    );
    let report = run(&mut pipeline).await.unwrap();

    let stored = sink.read().unwrap();
    assert_eq!(stored.triples, report.triples);
    assert_eq!(stored.document, "p1.pdf");
    assert_eq!(stored.chunks_processed, 1);
}

#[tokio::test]
async fn test_empty_document_reaches_done() {
    let backend = MockBackend::new();
    let sink = MemorySink::new();

    let mut pipeline = orchestrator(&backend, "", Arc::new(sink.clone()), small_chunks());
    let report = run(&mut pipeline).await.unwrap();

    assert_eq!(report.total_chunks, 0);
    assert_eq!(report.final_state, PipelineState::Done);
    assert_eq!(backend.call_count(), 0);
    assert!(sink.snapshots().is_empty());
}

// =============================================================================
// Fatal errors
// =============================================================================

#[tokio::test]
async fn test_model_load_failure_is_fatal() {
    let backend = MockBackend::new().failing_load("model not found");
    let sink = MemorySink::new();

    let mut pipeline = orchestrator(&backend, DOCUMENT, Arc::new(sink.clone()), small_chunks());
    let err = run(&mut pipeline).await.unwrap_err();

    assert!(matches!(err, DskgError::ModelLoad { .. }));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert_eq!(backend.call_count(), 0);
    assert!(sink.snapshots().is_empty());
}

#[tokio::test]
async fn test_unreadable_ontology_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let ontology = dir.path().join("broken.json");
    std::fs::write(&ontology, r#"{"classes": []}"#).unwrap();

    let backend = MockBackend::new();
    let mut pipeline = PipelineOrchestrator::new(
        ConstrainedGenerator::new(Arc::new(backend.clone())),
        Arc::new(MemorySink::new()),
    )
    .with_document_source(Arc::new(StaticDocument(DOCUMENT.to_string())));

    let err = pipeline
        .run(Path::new("p1.pdf"), &ontology)
        .await
        .unwrap_err();

    assert!(matches!(err, DskgError::Ontology { .. }));
    assert!(err.to_string().contains("broken.json"));
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_missing_document_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MockBackend::new();
    let mut pipeline = PipelineOrchestrator::new(
        ConstrainedGenerator::new(Arc::new(backend.clone())),
        Arc::new(MemorySink::new()),
    )
    .with_ontology_source(Arc::new(BundledOntology));

    let err = pipeline
        .run(&dir.path().join("missing.pdf"), Path::new("battery_cell.json"))
        .await
        .unwrap_err();

    assert!(matches!(err, DskgError::Document { .. }));
    assert_eq!(pipeline.state(), PipelineState::Failed);
}

#[tokio::test]
async fn test_plain_text_document_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let document = dir.path().join("datasheet.txt");
    std::fs::write(&document, "nominal voltage 3.6V").unwrap();

    let backend = MockBackend::new()
        .with_reply(json(&[voltage()]))
        .with_reply(json(&[voltage()]));
    let mut pipeline = PipelineOrchestrator::new(
        ConstrainedGenerator::new(Arc::new(backend.clone())),
        Arc::new(MemorySink::new()),
    )
    .with_ontology_source(Arc::new(BundledOntology));

    let report = pipeline
        .run(&document, Path::new("battery_cell.json"))
        .await
        .unwrap();
    assert_eq!(report.triples, vec![voltage()]);
}

// =============================================================================
// Properties
// =============================================================================

mod proptests {
    use super::*;
    use proptest::prelude::*;

    const RELATIONS: [&str; 5] = [
        "hasNominalVoltage",
        "hasNominalCapacity",
        "hasMass",
        "hasInternalResistance",
        "hasDiameter",
    ];

    fn triple(relation: &str) -> Triple {
        Triple::new(
            "rated 3.6",
            "Cell",
            "BatteryCell",
            relation,
            "3.6",
            "float",
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn validation_never_adds_relations(
            candidates in prop::collection::vec(prop::sample::select(RELATIONS.to_vec()), 0..4),
            validated in prop::collection::vec(prop::sample::select(RELATIONS.to_vec()), 0..6),
        ) {
            let candidates: Vec<Triple> = candidates.into_iter().map(triple).collect();
            let validated: Vec<Triple> = validated.into_iter().map(triple).collect();

            let backend = MockBackend::new()
                .with_reply(json(&candidates))
                .with_reply(json(&validated));
            let mut pipeline = orchestrator(
                &backend,
                "cell rated 3.6 volts",
                Arc::new(MemorySink::new()),
                PipelineOptions::default(),
            );

            let report = tokio_test::block_on(run(&mut pipeline)).unwrap();
            for t in &report.triples {
                prop_assert!(candidates.iter().any(|c| c.relation == t.relation));
            }
            prop_assert!(report.triples.len() <= validated.len());
        }
    }
}
