//! Ollama backend
//!
//! Uses `/api/generate` with the `format` field set to the JSON schema, so
//! decoding is grammar-constrained on the server. With `release_after_call`
//! the request carries `keep_alive: 0` and the server unloads the model as
//! soon as the response is complete.

use async_trait::async_trait;
use dskg_core::{ConstrainedSchema, DskgError, GenerationParams, LlmBackend, LlmConfig, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http_client;

/// Ollama API backend
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
    release_after_call: bool,
}

#[derive(Debug, Serialize)]
struct ShowRequest<'a> {
    model: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a Value,
    options: GenerateOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<u32>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
    repeat_penalty: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            release_after_call: true,
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            release_after_call: config.release_after_call,
        })
    }

    /// Keep the model resident between calls
    pub fn keep_loaded(mut self) -> Self {
        self.release_after_call = false;
        self
    }

    fn request<'a>(
        &'a self,
        prompt: &'a str,
        schema: &'a ConstrainedSchema,
        params: &GenerationParams,
    ) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: schema.json(),
            options: GenerateOptions {
                num_predict: params.max_tokens,
                temperature: params.temperature,
                repeat_penalty: params.repetition_penalty,
            },
            keep_alive: self.release_after_call.then_some(0),
        }
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn load(&self) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/show", self.base_url))
            .json(&ShowRequest { model: &self.model })
            .send()
            .await
            .map_err(|e| DskgError::ModelLoad {
                model: self.model.clone(),
                reason: format!("Ollama unreachable at {}: {e}", self.base_url),
            })?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(DskgError::ModelLoad {
                model: self.model.clone(),
                reason: "model not found on the Ollama server (try `ollama pull`)".to_string(),
            }),
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(DskgError::ModelLoad {
                    model: self.model.clone(),
                    reason: format!("Ollama returned {status}: {error_text}"),
                })
            }
        }
    }

    async fn complete(
        &self,
        prompt: &str,
        schema: &ConstrainedSchema,
        params: &GenerationParams,
    ) -> Result<String> {
        let request = self.request(prompt, schema, params);

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| DskgError::Generation(format!("Ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DskgError::Generation(format!("Ollama error: {error_text}")));
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| DskgError::Generation(format!("Failed to parse Ollama response: {e}")))?;

        if result.done_reason.as_deref() == Some("length") {
            tracing::warn!(
                max_tokens = params.max_tokens,
                eval_count = result.eval_count,
                "Ollama output hit the token limit"
            );
        }

        Ok(result.response)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
