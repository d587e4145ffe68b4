//! The language-model collaborator.
//!
//! A [`Provider`] turns a prompt into text and, optionally, text into
//! embeddings. A response schema is a request, not a guarantee: every caller
//! parses the reply and has a fallback for output that does not conform.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, Role};

const DEFAULT_TEMPERATURE: f32 = 0.2;

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// JSON Schema the reply should follow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl ProviderRequest {
    /// Every stage prompt is one system message followed by one user message.
    pub fn prompt(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::system(system), Message::user(user)],
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            response_schema: None,
            stop: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Content of the first message with `role`, or `""`.
    pub fn text_of(&self, role: Role) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == role)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub message: Message,
    pub usage: Option<Usage>,
    /// The model that answered, which a router may have substituted.
    pub model: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub inputs: Vec<String>,
}

/// One vector per input, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Chat-only backends keep this default.
    async fn embed(&self, _request: EmbeddingRequest) -> std::result::Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::NotConfigured(format!(
            "{} cannot produce embeddings",
            self.name()
        )))
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
