//! OpenAI-compatible backend
//!
//! Structured outputs need an object at the schema root, so the triple array
//! is wrapped as `{"triples": [...]}` on the way out and unwrapped on return.

use async_trait::async_trait;
use dskg_core::{ConstrainedSchema, DskgError, GenerationParams, LlmBackend, LlmConfig, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::http_client;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const WRAPPER_KEY: &str = "triples";

const SYSTEM_PROMPT: &str =
    "You extract ontology-aligned triples from battery datasheets and answer only with JSON.";

/// OpenAI API backend
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    frequency_penalty: f32,
    response_format: Value,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl OpenAiBackend {
    /// Create a new OpenAI backend
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| DskgError::Config("OpenAI API key required".to_string()))?;

        let base_url = config
            .openai_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key: api_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    /// Set custom base URL (for vLLM or other compatible servers)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn request<'a>(
        &'a self,
        prompt: &'a str,
        schema: &ConstrainedSchema,
        params: &GenerationParams,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            frequency_penalty: (params.repetition_penalty - 1.0).clamp(-2.0, 2.0),
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name(),
                    "strict": true,
                    "schema": wrap_schema(schema.json()),
                }
            }),
        }
    }
}

fn wrap_schema(array_schema: &Value) -> Value {
    json!({
        "type": "object",
        "properties": { WRAPPER_KEY: array_schema },
        "required": [WRAPPER_KEY],
        "additionalProperties": false,
    })
}

/// Return the wrapped array, or the content unchanged if it is not wrapped
fn unwrap_content(content: &str) -> String {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(mut obj)) => match obj.remove(WRAPPER_KEY) {
            Some(array) => array.to_string(),
            None => content.to_string(),
        },
        _ => content.to_string(),
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn load(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/models/{}", self.base_url, self.model))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| DskgError::ModelLoad {
                model: self.model.clone(),
                reason: format!("API unreachable at {}: {e}", self.base_url),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            Err(DskgError::ModelLoad {
                model: self.model.clone(),
                reason: format!("model lookup returned {status}: {error_text}"),
            })
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
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DskgError::Generation(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DskgError::Generation(format!("OpenAI error: {error_text}")));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| DskgError::Generation(format!("Failed to parse response: {e}")))?;

        let choice = result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DskgError::Generation("No response generated".to_string()))?;

        if let Some(refusal) = choice.message.refusal {
            return Err(DskgError::Generation(format!("Model refused: {refusal}")));
        }
        if choice.finish_reason.as_deref() == Some("length") {
            tracing::warn!(max_tokens = params.max_tokens, "OpenAI output hit the token limit");
        }

        let content = choice.message.content.unwrap_or_default();
        Ok(unwrap_content(&content))
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "openai"
    }
}
