//! Scripted backend for deterministic tests
//!
//! Replies are consumed in call order. When the script runs out, the
//! fallback reply (an empty array by default) is returned.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dskg_core::{ConstrainedSchema, DskgError, GenerationParams, LlmBackend, Result};

/// One scripted backend reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this text
    Text(String),

    /// Fail with a recoverable generation error
    Error(String),

    /// Wait, then return this text
    Delayed(Duration, String),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn delayed(delay: Duration, text: impl Into<String>) -> Self {
        Self::Delayed(delay, text.into())
    }
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<MockReply>,
    prompts: Vec<String>,
}

/// Mock backend replaying scripted replies
#[derive(Debug, Clone)]
pub struct MockBackend {
    model: String,
    fallback: MockReply,
    load_error: Option<String>,
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            fallback: MockReply::text("[]"),
            load_error: None,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Set the reported model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Append a reply to the script
    pub fn with_reply(self, reply: MockReply) -> Self {
        self.push_reply(reply);
        self
    }

    /// Reply used once the script is exhausted
    pub fn with_fallback(mut self, reply: MockReply) -> Self {
        self.fallback = reply;
        self
    }

    /// Make `load` fail with `reason`
    pub fn failing_load(mut self, reason: impl Into<String>) -> Self {
        self.load_error = Some(reason.into());
        self
    }

    /// Append a reply to the script of a shared backend
    pub fn push_reply(&self, reply: MockReply) {
        self.state().script.push_back(reply);
    }

    /// Number of `complete` calls so far
    pub fn call_count(&self) -> usize {
        self.state().prompts.len()
    }

    /// Prompts received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.state().prompts.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn load(&self) -> Result<()> {
        match &self.load_error {
            Some(reason) => Err(DskgError::ModelLoad {
                model: self.model.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn complete(
        &self,
        prompt: &str,
        _schema: &ConstrainedSchema,
        _params: &GenerationParams,
    ) -> Result<String> {
        let reply = {
            let mut state = self.state();
            state.prompts.push(prompt.to_string());
            state
                .script
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        };

        match reply {
            MockReply::Text(text) => Ok(text),
            MockReply::Error(message) => Err(DskgError::Generation(message)),
            MockReply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "mock"
    }
}
