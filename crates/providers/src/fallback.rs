//! Ordered provider chain with a timeout per link.
//!
//! The planner, resolver and integrator each make one logical LLM call per
//! stage. The chain turns that call into "first link that answers in
//! time"; the stage only sees the last link's error when every link failed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use pursuit_core::Provider;
use pursuit_core::error::ProviderError;
use pursuit_core::provider::{EmbeddingRequest, EmbeddingResponse, ProviderRequest, ProviderResponse};

struct Link {
    provider: Arc<dyn Provider>,
    timeout: Duration,
}

pub struct FallbackProvider {
    name: String,
    links: Vec<Link>,
}

impl FallbackProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            links: Vec::new(),
        }
    }

    /// Append `provider`, bounded by `timeout` per call.
    pub fn add(mut self, provider: Arc<dyn Provider>, timeout: Duration) -> Self {
        self.links.push(Link { provider, timeout });
        self
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    async fn first_success<T, F, Fut>(&self, op: &str, call: F) -> Result<T, ProviderError>
    where
        F: Fn(Arc<dyn Provider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last = ProviderError::NotConfigured(format!("chain '{}' has no providers", self.name));

        for (position, link) in self.links.iter().enumerate() {
            let provider = link.provider.name().to_string();
            debug!(chain = %self.name, provider = %provider, position, op, "Calling provider");

            last = match tokio::time::timeout(link.timeout, call(link.provider.clone())).await {
                Ok(Ok(value)) => {
                    if position > 0 {
                        warn!(chain = %self.name, provider = %provider, op, "Answered by a fallback provider");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    warn!(chain = %self.name, provider = %provider, op, error = %e, "Provider failed");
                    e
                }
                Err(_) => {
                    warn!(
                        chain = %self.name,
                        provider = %provider,
                        op,
                        timeout_secs = link.timeout.as_secs_f64(),
                        "Provider timed out"
                    );
                    ProviderError::Timeout(format!("{provider} gave no {op} reply within {:?}", link.timeout))
                }
            };
        }

        Err(last)
    }
}

#[async_trait]
impl Provider for FallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.first_success("completion", |provider| {
            let request = request.clone();
            async move { provider.complete(request).await }
        })
        .await
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        self.first_success("embedding", |provider| {
            let request = request.clone();
            async move { provider.embed(request).await }
        })
        .await
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        for link in &self.links {
            if matches!(link.provider.health_check().await, Ok(true)) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
