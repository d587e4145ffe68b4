//! Builds the configured endpoints and orders them into the chain every
//! pipeline stage calls through.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use pursuit_config::{AppConfig, ProviderConfig};
use pursuit_core::provider::Provider;

use crate::fallback::FallbackProvider;
use crate::openai_compat::OpenAiCompatProvider;

const UNLISTED_TIMEOUT: Duration = Duration::from_secs(30);

struct Endpoint {
    provider: Arc<dyn Provider>,
    timeout: Duration,
}

/// Named endpoints plus the order in which they are tried.
pub struct ProviderRouter {
    endpoints: HashMap<String, Endpoint>,
    primary: String,
    fallbacks: Vec<String>,
}

impl ProviderRouter {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            endpoints: HashMap::new(),
            primary: primary.into(),
            fallbacks: Vec::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>, timeout: Duration) {
        self.endpoints.insert(name.into(), Endpoint { provider, timeout });
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<String>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn primary(&self) -> Option<Arc<dyn Provider>> {
        self.get(&self.primary)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.endpoints.get(name).map(|e| e.provider.clone())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Primary first, then each distinct fallback. Names with no endpoint
    /// are logged and left out.
    pub fn fallback_chain(&self) -> FallbackProvider {
        let mut order: Vec<&String> = vec![&self.primary];
        for name in &self.fallbacks {
            if !order.contains(&name) {
                order.push(name);
            }
        }

        order.into_iter().fold(FallbackProvider::new("chain"), |chain, name| {
            match self.endpoints.get(name) {
                Some(endpoint) => chain.add(endpoint.provider.clone(), endpoint.timeout),
                None => {
                    warn!(provider = %name, "No endpoint configured under this name, leaving it out of the chain");
                    chain
                }
            }
        })
    }

    pub fn chain(&self) -> Arc<dyn Provider> {
        Arc::new(self.fallback_chain())
    }
}

/// One OpenAI-compatible endpoint per `[providers.<name>]` table. The
/// primary is always present, built from the top-level key if it has no table.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router =
        ProviderRouter::new(&config.default_provider).with_fallbacks(config.fallback_providers.clone());

    let endpoint = |name: &str, table: Option<&ProviderConfig>| {
        let key = table
            .and_then(|t| t.api_key.as_ref())
            .or(config.api_key.as_ref())
            .cloned()
            .unwrap_or_default();
        let url = table
            .and_then(|t| t.api_url.clone())
            .unwrap_or_else(|| known_base_url(name));
        let model = table.and_then(|t| t.default_model.clone());
        Arc::new(OpenAiCompatProvider::new(name, url, key).with_model(model)) as Arc<dyn Provider>
    };

    for (name, table) in &config.providers {
        router.register(
            name.clone(),
            endpoint(name, Some(table)),
            Duration::from_secs(table.timeout_secs),
        );
    }

    if router.get(&config.default_provider).is_none() {
        router.register(
            config.default_provider.clone(),
            endpoint(&config.default_provider, None),
            Duration::from_secs(config.resolver.reasoning_timeout_secs).max(UNLISTED_TIMEOUT),
        );
    }

    router
}

fn known_base_url(name: &str) -> String {
    let url = match name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "vllm" => "http://localhost:8000/v1",
        other => return format!("https://{other}.api.example.com/v1"),
    };
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(timeout_secs: u64) -> ProviderConfig {
        ProviderConfig {
            api_key: None,
            api_url: None,
            default_model: None,
            timeout_secs,
        }
    }

    #[test]
    fn primary_is_created_even_without_a_table() {
        let router = build_from_config(&AppConfig::default());
        assert!(router.primary().is_some());
        assert_eq!(router.names(), vec!["openrouter"]);
        assert_eq!(router.fallback_chain().len(), 1);
    }

    #[test]
    fn chain_order_skips_unknown_and_repeated_names() {
        let mut config = AppConfig::default();
        config.fallback_providers = vec!["ollama".into(), "missing".into(), "openrouter".into(), "ollama".into()];
        config.providers.insert("ollama".into(), table(5));

        let router = build_from_config(&config);
        assert_eq!(router.names(), vec!["ollama", "openrouter"]);
        assert_eq!(router.fallback_chain().len(), 2);
        assert_eq!(router.chain().name(), "chain");
    }

    #[test]
    fn lookup_by_name() {
        let mut router = ProviderRouter::new("openai");
        assert!(router.primary().is_none());
        router.register("openai", Arc::new(OpenAiCompatProvider::openai("sk-test")), Duration::from_secs(5));
        assert_eq!(router.primary().unwrap().name(), "openai");
        assert!(router.get("groq").is_none());
    }

    #[test]
    fn well_known_endpoints() {
        assert_eq!(known_base_url("openrouter"), "https://openrouter.ai/api/v1");
        assert!(known_base_url("ollama").contains("localhost:11434"));
        assert_eq!(known_base_url("acme"), "https://acme.api.example.com/v1");
    }
}
