//! Persisted extraction results
//!
//! After every chunk the orchestrator hands the whole accumulator to a
//! [`ResultSink`]. `FileSink` rewrites a JSON file atomically, so a reader
//! never sees a partially written chunk.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dskg_core::{DskgError, Result, Triple};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Accumulator state handed to a sink after a chunk
#[derive(Debug, Clone, Serialize)]
pub struct ResultSnapshot<'a> {
    pub run_id: Uuid,
    pub document: &'a str,
    pub model: &'a str,
    pub chunks_processed: usize,
    pub total_chunks: usize,
    pub updated_at: DateTime<Utc>,
    pub triples: &'a [Triple],
}

/// Owned form of a persisted snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedResults {
    pub run_id: Uuid,
    pub document: String,
    pub model: String,
    pub chunks_processed: usize,
    pub total_chunks: usize,
    pub updated_at: DateTime<Utc>,
    pub triples: Vec<Triple>,
}

impl From<&ResultSnapshot<'_>> for PersistedResults {
    fn from(snapshot: &ResultSnapshot<'_>) -> Self {
        Self {
            run_id: snapshot.run_id,
            document: snapshot.document.to_string(),
            model: snapshot.model.to_string(),
            chunks_processed: snapshot.chunks_processed,
            total_chunks: snapshot.total_chunks,
            updated_at: snapshot.updated_at,
            triples: snapshot.triples.to_vec(),
        }
    }
}

/// Destination for the accumulated triples of a run
pub trait ResultSink: Send + Sync {
    /// Replace the stored results with `snapshot`
    fn persist(&self, snapshot: &ResultSnapshot<'_>) -> Result<()>;
}

// ============================================================================
// File Sink
// ============================================================================

/// Writes results to a pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the last persisted results
    pub fn read(&self) -> Result<PersistedResults> {
        let content = std::fs::read(&self.path).map_err(|e| self.error(e))?;
        serde_json::from_slice(&content)
            .map_err(|e| self.error(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    fn error(&self, source: std::io::Error) -> DskgError {
        DskgError::Persistence {
            path: self.path.clone(),
            source,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ResultSink for FileSink {
    fn persist(&self, snapshot: &ResultSnapshot<'_>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.error(e))?;
        }

        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| self.error(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let tmp = self.temp_path();
        let mut file = std::fs::File::create(&tmp).map_err(|e| self.error(e))?;
        file.write_all(&json).map_err(|e| self.error(e))?;
        file.sync_all().map_err(|e| self.error(e))?;
        drop(file);

        std::fs::rename(&tmp, &self.path).map_err(|e| self.error(e))?;

        tracing::debug!(
            path = %self.path.display(),
            triples = snapshot.triples.len(),
            chunks = snapshot.chunks_processed,
            "Results persisted"
        );
        Ok(())
    }
}

// ============================================================================
// Memory Sink
// ============================================================================

/// Keeps every snapshot in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    snapshots: Arc<Mutex<Vec<PersistedResults>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All snapshots in persist order
    pub fn snapshots(&self) -> Vec<PersistedResults> {
        self.lock().clone()
    }

    /// Most recent snapshot
    pub fn latest(&self) -> Option<PersistedResults> {
        self.lock().last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PersistedResults>> {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ResultSink for MemorySink {
    fn persist(&self, snapshot: &ResultSnapshot<'_>) -> Result<()> {
        self.lock().push(PersistedResults::from(snapshot));
        Ok(())
    }
}
