//! dskg LLM - Schema-constrained generation
//!
//! `ConstrainedGenerator` wraps an [`LlmBackend`] so that every successful
//! call yields a JSON array conforming to a [`ConstrainedSchema`]:
//! - the backend is asked to enforce the schema while decoding
//! - the output is re-checked, so a backend that ignores the schema produces
//!   a `MalformedOutput` error rather than bad triples
//! - calls are serialized on a [`DeviceLease`] held for the whole call
//!
//! Backends: Ollama and OpenAI-compatible servers over HTTP, plus a scripted
//! [`MockBackend`] for tests.

pub mod mock;
pub mod ollama;
pub mod openai;

pub use mock::{MockBackend, MockReply};
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use std::sync::Arc;
use std::time::Instant;

use dskg_core::{
    ConstrainedSchema, DskgError, GenerationParams, LlmBackend, LlmConfig, LlmProvider, Result,
    Triple,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

// ============================================================================
// Device Lease
// ============================================================================

/// Exclusive access to the accelerator a backend runs on
///
/// Clones share the same underlying permit, so generators built on one lease
/// never run concurrently.
#[derive(Debug, Clone)]
pub struct DeviceLease {
    permit: Arc<Semaphore>,
}

impl DeviceLease {
    pub fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait for the device and hold it until the guard is dropped
    pub async fn acquire(&self) -> Result<DeviceGuard> {
        let permit = self
            .permit
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| DskgError::Generation(format!("device lease closed: {e}")))?;

        tracing::trace!("Device acquired");
        Ok(DeviceGuard {
            _permit: permit,
            acquired_at: Instant::now(),
        })
    }

    /// Whether a call currently holds the device
    pub fn is_held(&self) -> bool {
        self.permit.available_permits() == 0
    }
}

impl Default for DeviceLease {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the device when dropped, on every exit path
#[derive(Debug)]
pub struct DeviceGuard {
    _permit: OwnedSemaphorePermit,
    acquired_at: Instant,
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        tracing::trace!(
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Device released"
        );
    }
}

// ============================================================================
// Constrained Generator
// ============================================================================

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").expect("valid code fence regex")
});

/// Remove a surrounding markdown code fence, if any
pub fn strip_code_fence(output: &str) -> &str {
    match CODE_FENCE.captures(output).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => output.trim(),
    }
}

/// Generator whose output always conforms to the schema it was called with
pub struct ConstrainedGenerator {
    backend: Arc<dyn LlmBackend>,
    device: DeviceLease,
}

impl ConstrainedGenerator {
    /// Wrap a backend with its own device lease
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self::with_device(backend, DeviceLease::new())
    }

    /// Wrap a backend sharing an existing device lease
    pub fn with_device(backend: Arc<dyn LlmBackend>, device: DeviceLease) -> Self {
        Self { backend, device }
    }

    /// Model identifier of the wrapped backend
    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Name of the wrapped backend
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn device(&self) -> &DeviceLease {
        &self.device
    }

    /// Make sure the model is available. Any failure is a `ModelLoad` error.
    pub async fn load(&self) -> Result<()> {
        let _device = self.device.acquire().await?;

        match self.backend.load().await {
            Ok(()) => {
                tracing::info!(
                    backend = self.backend.name(),
                    model = self.backend.model(),
                    "Model ready"
                );
                Ok(())
            }
            Err(e @ DskgError::ModelLoad { .. }) => Err(e),
            Err(e) => Err(DskgError::ModelLoad {
                model: self.backend.model().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Generate a schema-conforming JSON array for `prompt`
    ///
    /// Returns the canonical serialization of the accepted triples.
    pub async fn generate(
        &self,
        prompt: &str,
        schema: &ConstrainedSchema,
        params: &GenerationParams,
    ) -> Result<String> {
        let triples = self.generate_triples(prompt, schema, params).await?;
        serde_json::to_string(&triples)
            .map_err(|e| DskgError::MalformedOutput(format!("failed to serialize triples: {e}")))
    }

    /// Generate and parse triples for `prompt`
    pub async fn generate_triples(
        &self,
        prompt: &str,
        schema: &ConstrainedSchema,
        params: &GenerationParams,
    ) -> Result<Vec<Triple>> {
        let raw = {
            let _device = self.device.acquire().await?;
            let started = Instant::now();

            tracing::debug!(
                backend = self.backend.name(),
                prompt_chars = prompt.len(),
                max_tokens = params.max_tokens,
                "Generation started"
            );

            let raw = self.backend.complete(prompt, schema, params).await?;

            tracing::debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                output_chars = raw.len(),
                "Generation finished"
            );
            raw
        };

        Ok(schema.check(strip_code_fence(&raw))?)
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create a generation backend from config
pub fn create_backend(config: &LlmConfig) -> Result<Arc<dyn LlmBackend>> {
    match config.provider {
        LlmProvider::OpenAI => Ok(Arc::new(OpenAiBackend::from_config(config)?)),
        LlmProvider::Ollama => Ok(Arc::new(OllamaBackend::from_config(config)?)),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DskgError::Config(format!("failed to build HTTP client: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
