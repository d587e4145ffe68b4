//! Provider for any endpoint speaking the OpenAI chat-completions dialect
//! (OpenRouter, OpenAI, Ollama, vLLM, Groq, ...).
//!
//! Schema-constrained requests go out as `response_format: json_schema`.
//! Some endpoints reject that field with a 400; the request is then
//! repeated once without it, since the planner validates its output anyway.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pursuit_core::error::ProviderError;
use pursuit_core::message::{Message, Role};
use pursuit_core::provider::{EmbeddingRequest, EmbeddingResponse, ProviderRequest, ProviderResponse, Usage};

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    /// Replaces the requested model, for endpoints that name models differently.
    model: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: None,
            client,
        }
    }

    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Local Ollama; the key is ignored by the server.
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new("ollama", base_url.unwrap_or("http://localhost:11434/v1"), "ollama")
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    fn model_for<'a>(&'a self, request_model: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(request_model)
    }

    fn chat_body<'a>(&'a self, request: &'a ProviderRequest, with_schema: bool) -> ChatBody<'a> {
        ChatBody {
            model: self.model_for(&request.model),
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: role_name(m.role),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stop: &request.stop,
            stream: false,
            response_format: request
                .response_schema
                .as_ref()
                .filter(|_| with_schema)
                .map(|schema| ResponseFormat {
                    kind: "json_schema",
                    json_schema: NamedSchema {
                        name: "response",
                        schema,
                        strict: false,
                    },
                }),
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(format!("{}: {e}", self.name))
                } else {
                    ProviderError::Network(format!("{}: {e}", self.name))
                }
            })?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(status_error(response).await)
        }
    }

    async fn chat(&self, request: &ProviderRequest, with_schema: bool) -> Result<ChatReply, ProviderError> {
        let response = self.post("chat/completions", &self.chat_body(request, with_schema)).await?;
        response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("unreadable completion from {}: {e}", self.name),
        })
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

async fn status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        401 | 403 => ProviderError::AuthenticationFailed(format!("status {status}: check the API key")),
        _ => {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Provider returned an error");
            ProviderError::ApiError {
                status_code: status,
                message: body,
            }
        }
    }
}

#[async_trait]
impl pursuit_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let constrained = request.response_schema.is_some();
        debug!(provider = %self.name, model = %request.model, constrained, "Completion request");

        let reply = match self.chat(&request, constrained).await {
            Err(ProviderError::ApiError { status_code: 400, message }) if constrained => {
                warn!(provider = %self.name, error = %message, "Schema rejected, retrying unconstrained");
                self.chat(&request, false).await?
            }
            other => other?,
        };

        let content = reply
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ProviderError::EmptyResponse(format!(
                "{} returned no content for {}",
                self.name, reply.model
            )));
        }

        Ok(ProviderResponse {
            message: Message::assistant(content),
            usage: reply.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            model: reply.model,
        })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, inputs = request.inputs.len(), "Embedding request");
        let body = EmbedBody {
            model: self.model_for(&request.model),
            input: &request.inputs,
            encoding_format: "float",
        };
        let reply: EmbedReply = self
            .post("embeddings", &body)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("unreadable embeddings from {}: {e}", self.name),
            })?;

        let mut data = reply.data;
        data.sort_by_key(|d| d.index);
        Ok(EmbeddingResponse {
            embeddings: data.into_iter().map(|d| d.embedding).collect(),
            model: reply.model,
        })
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "no_stops")]
    stop: &'a [String],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

fn no_stops(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: NamedSchema<'a>,
}

#[derive(Debug, Serialize)]
struct NamedSchema<'a> {
    name: &'static str,
    schema: &'a serde_json::Value,
    strict: bool,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct EmbedBody<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbedReply {
    data: Vec<EmbedDatum>,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pursuit_core::Provider;

    fn body_json(request: &ProviderRequest, with_schema: bool) -> serde_json::Value {
        let provider = OpenAiCompatProvider::openai("k");
        serde_json::to_value(provider.chat_body(request, with_schema)).unwrap()
    }

    #[test]
    fn constructors_normalise_the_base_url() {
        assert_eq!(OpenAiCompatProvider::openrouter("k").name(), "openrouter");
        assert!(OpenAiCompatProvider::ollama(None).base_url.ends_with("11434/v1"));
        let custom = OpenAiCompatProvider::new("custom", "http://localhost:8000/v1/", "k");
        assert_eq!(custom.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn planner_request_carries_its_schema() {
        let request = ProviderRequest::prompt("gpt-4o-mini", "Decompose.", "Question: income limit?")
            .with_schema(serde_json::json!({"type": "object", "required": ["sub_questions"]}))
            .with_max_tokens(300);
        let body = body_json(&request, true);

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Question: income limit?");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["schema"]["required"][0], "sub_questions");
        assert_eq!(body["max_tokens"], 300);
        assert_eq!(body["stream"], false);
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn unconstrained_retry_drops_the_schema() {
        let request = ProviderRequest::prompt("m", "s", "u").with_schema(serde_json::json!({"type": "object"}));
        assert!(body_json(&request, false).get("response_format").is_none());
        let plain = ProviderRequest::prompt("m", "s", "u");
        assert!(body_json(&plain, true).get("response_format").is_none());
    }

    #[test]
    fn endpoint_model_overrides_the_requested_one() {
        let request = ProviderRequest::prompt("gpt-4o-mini", "s", "u");
        let local = OpenAiCompatProvider::ollama(None).with_model(Some("llama3.1:8b".into()));
        let body = serde_json::to_value(local.chat_body(&request, false)).unwrap();
        assert_eq!(body["model"], "llama3.1:8b");
        assert_eq!(body_json(&request, false)["model"], "gpt-4o-mini");
    }

    #[test]
    fn reply_without_content_parses() {
        let reply: ChatReply =
            serde_json::from_str(r#"{"model":"m","choices":[{"message":{"role":"assistant"}}]}"#).unwrap();
        assert!(reply.choices[0].message.content.is_none());
        assert!(reply.usage.is_none());
    }

    #[test]
    fn embedding_reply_parses_with_indices() {
        let reply: EmbedReply = serde_json::from_str(
            r#"{"data":[{"embedding":[0.4,0.5],"index":1},{"embedding":[0.1,0.2],"index":0}],"model":"text-embedding-3-small"}"#,
        )
        .unwrap();
        assert_eq!(reply.data.len(), 2);
        assert_eq!(reply.data[0].index, 1);
        assert_eq!(reply.model, "text-embedding-3-small");
    }
}
