//! Pursuit configuration.
//!
//! One TOML file (`~/.pursuit/config.toml` unless a path is given), every
//! section optional. A few environment variables override the file, and the
//! merged result is validated once before anything is built from it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Shared key for providers whose table has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// First link of the provider chain.
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model named in every stage request.
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Token cap for reasoning and integration replies.
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Tried in order after `default_provider`.
    #[serde(default)]
    pub fallback_providers: Vec<String>,

    /// `[providers.<name>]` tables.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub continuity: ContinuityConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}

fn redact(secret: &Option<String>) -> &'static str {
    if secret.is_some() { "***" } else { "unset" }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("fallback_providers", &self.fallback_providers)
            .field("providers", &self.providers)
            .field("retrieval", &self.retrieval)
            .field("resolver", &self.resolver)
            .field("planner", &self.planner)
            .field("continuity", &self.continuity)
            .field("service", &self.service)
            .field("tools", &self.tools)
            .field("store", &self.store)
            .field("gateway", &self.gateway)
            .field("logging", &self.logging)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Per-provider timeout inside the fallback chain
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_timeout() -> u64 {
    30
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// --- Retrieval ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Fused confidence at or above which the engine answers
    #[serde(default = "default_answer_threshold")]
    pub answer_threshold: f64,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Tie-break order between channels
    #[serde(default = "default_channel_priority")]
    pub channel_priority: Vec<String>,

    #[serde(default = "default_channel_timeout")]
    pub channel_timeout_secs: u64,

    /// JSONL export of published parent units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_path: Option<PathBuf>,

    #[serde(default)]
    pub sparse: SparseConfig,

    #[serde(default)]
    pub dense: DenseConfig,
}

fn default_answer_threshold() -> f64 {
    0.65
}
fn default_top_k() -> usize {
    10
}
fn default_channel_priority() -> Vec<String> {
    vec!["sparse".into(), "dense".into()]
}
fn default_channel_timeout() -> u64 {
    8
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            answer_threshold: default_answer_threshold(),
            top_k: default_top_k(),
            channel_priority: default_channel_priority(),
            channel_timeout_secs: default_channel_timeout(),
            corpus_path: None,
            sparse: SparseConfig::default(),
            dense: DenseConfig::default(),
        }
    }
}

/// BM25 parameters and the sigmoid that calibrates its raw scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseConfig {
    #[serde(default = "default_k1")]
    pub k1: f64,

    #[serde(default = "default_b")]
    pub b: f64,

    /// Sigmoid slope; fit with `pursuit calibrate`
    #[serde(default = "default_sigmoid_k")]
    pub sigmoid_k: f64,

    /// Sigmoid midpoint; fit with `pursuit calibrate`
    #[serde(default = "default_sigmoid_x0")]
    pub sigmoid_x0: f64,
}

fn default_k1() -> f64 {
    1.5
}
fn default_b() -> f64 {
    0.75
}
fn default_sigmoid_k() -> f64 {
    0.5
}
fn default_sigmoid_x0() -> f64 {
    6.0
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            sigmoid_k: default_sigmoid_k(),
            sigmoid_x0: default_sigmoid_x0(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseConfig {
    /// Similarity that maps onto `anchor_confidence`
    #[serde(default = "default_anchor_similarity")]
    pub anchor_similarity: f64,

    #[serde(default = "default_anchor_confidence")]
    pub anchor_confidence: f64,

    /// "hashing" (offline, deterministic) or "provider"
    #[serde(default = "default_embedder")]
    pub embedder: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_anchor_similarity() -> f64 {
    0.88
}
fn default_anchor_confidence() -> f64 {
    0.65
}
fn default_embedder() -> String {
    "hashing".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_dimensions() -> usize {
    256
}

impl Default for DenseConfig {
    fn default() -> Self {
        Self {
            anchor_similarity: default_anchor_similarity(),
            anchor_confidence: default_anchor_confidence(),
            embedder: default_embedder(),
            embedding_model: default_embedding_model(),
            dimensions: default_dimensions(),
        }
    }
}

// --- Pipeline stages ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_retrieval_timeout")]
    pub retrieval_timeout_secs: u64,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    #[serde(default = "default_reasoning_timeout")]
    pub reasoning_timeout_secs: u64,

    /// Candidates handed to the grounded answer prompt
    #[serde(default = "default_evidence_per_answer")]
    pub evidence_per_answer: usize,
}

fn default_retrieval_timeout() -> u64 {
    20
}
fn default_tool_timeout() -> u64 {
    15
}
fn default_reasoning_timeout() -> u64 {
    30
}
fn default_evidence_per_answer() -> usize {
    4
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            retrieval_timeout_secs: default_retrieval_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            reasoning_timeout_secs: default_reasoning_timeout(),
            evidence_per_answer: default_evidence_per_answer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_max_sub_questions")]
    pub max_sub_questions: usize,

    #[serde(default = "default_planner_timeout")]
    pub timeout_secs: u64,
}

fn default_max_sub_questions() -> usize {
    5
}
fn default_planner_timeout() -> u64 {
    20
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_sub_questions: default_max_sub_questions(),
            timeout_secs: default_planner_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuityConfig {
    /// Unresolved turns before an objective becomes incomplete
    #[serde(default = "default_attempt_ceiling")]
    pub attempt_ceiling: u32,

    #[serde(default = "default_cancellation_phrases")]
    pub cancellation_phrases: Vec<String>,

    #[serde(default = "default_retry_phrases")]
    pub retry_phrases: Vec<String>,

    #[serde(default = "default_closure_message")]
    pub closure_message: String,
}

fn default_attempt_ceiling() -> u32 {
    4
}
fn default_cancellation_phrases() -> Vec<String> {
    ["stop", "never mind", "nevermind", "cancel", "forget it"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_retry_phrases() -> Vec<String> {
    ["try again", "retry"].into_iter().map(String::from).collect()
}
fn default_closure_message() -> String {
    "I wasn't able to fully resolve this after several attempts. \
     Here is everything I found so far. Say \"retry\" if you'd like me to start over on it."
        .into()
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            attempt_ceiling: default_attempt_ceiling(),
            cancellation_phrases: default_cancellation_phrases(),
            retry_phrases: default_retry_phrases(),
            closure_message: default_closure_message(),
        }
    }
}

// --- Runtime surfaces ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Worker pool width (concurrent correlation ids)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Stream re-poll interval when no wake-up arrives
    #[serde(default = "default_stream_poll_ms")]
    pub stream_poll_ms: u64,
}

fn default_workers() -> usize {
    4
}
fn default_stream_poll_ms() -> u64 {
    500
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            stream_poll_ms: default_stream_poll_ms(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Search API endpoint (Brave-compatible JSON); web search is disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_api_key: Option<String>,

    /// Fetched page text is truncated to this many characters
    #[serde(default = "default_fetch_max_chars")]
    pub fetch_max_chars: usize,
}

fn default_fetch_max_chars() -> usize {
    20_000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            search_endpoint: None,
            search_api_key: None,
            fetch_max_chars: default_fetch_max_chars(),
        }
    }
}

impl std::fmt::Debug for ToolsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsConfig")
            .field("search_endpoint", &self.search_endpoint)
            .field("search_api_key", &redact(&self.search_api_key))
            .field("fetch_max_chars", &self.fetch_max_chars)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database file; defaults to `~/.pursuit/pursuit.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("pursuit.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

impl AppConfig {
    /// `~/.pursuit/config.toml` plus environment overrides:
    /// `PURSUIT_API_KEY` (beats the file), `OPENROUTER_API_KEY` and
    /// `OPENAI_API_KEY` (only when the file has no key), `PURSUIT_PROVIDER`,
    /// `PURSUIT_MODEL`, `PURSUIT_STORE_PATH`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::read(&Self::config_dir().join("config.toml"))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Like [`AppConfig::load`] for an explicit file. A missing file yields
    /// the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::ReadError {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Some(key) = std::env::var("PURSUIT_API_KEY")
            .ok()
            .or_else(|| if self.api_key.is_none() { std::env::var("OPENROUTER_API_KEY").ok() } else { None })
            .or_else(|| if self.api_key.is_none() { std::env::var("OPENAI_API_KEY").ok() } else { None })
        {
            self.api_key = Some(key);
        }

        if let Ok(provider) = std::env::var("PURSUIT_PROVIDER") {
            self.default_provider = provider;
        }

        if let Ok(model) = std::env::var("PURSUIT_MODEL") {
            self.default_model = model;
        }

        if let Ok(path) = std::env::var("PURSUIT_STORE_PATH") {
            self.store.path = Some(PathBuf::from(path));
        }
    }

    pub fn config_dir() -> PathBuf {
        home_dir().join(".pursuit")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let unit = |name: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::ValidationError(format!("{name} must be within [0, 1], got {value}")))
            }
        };
        unit("retrieval.answer_threshold", self.retrieval.answer_threshold)?;
        unit("retrieval.dense.anchor_similarity", self.retrieval.dense.anchor_similarity)?;
        unit("retrieval.dense.anchor_confidence", self.retrieval.dense.anchor_confidence)?;
        unit("retrieval.sparse.b", self.retrieval.sparse.b)?;

        if self.retrieval.sparse.k1 <= 0.0 {
            return Err(ConfigError::ValidationError("retrieval.sparse.k1 must be > 0".into()));
        }

        let mut priority: Vec<String> = self
            .retrieval
            .channel_priority
            .iter()
            .map(|c| c.trim().to_ascii_lowercase())
            .collect();
        priority.sort();
        if priority != ["dense", "sparse"] {
            return Err(ConfigError::ValidationError(format!(
                "retrieval.channel_priority must list \"sparse\" and \"dense\" exactly once each, got {:?}",
                self.retrieval.channel_priority
            )));
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError("retrieval.top_k must be > 0".into()));
        }

        if !matches!(self.retrieval.dense.embedder.as_str(), "hashing" | "provider") {
            return Err(ConfigError::ValidationError(format!(
                "retrieval.dense.embedder must be \"hashing\" or \"provider\", got {:?}",
                self.retrieval.dense.embedder
            )));
        }

        if self.continuity.attempt_ceiling == 0 {
            return Err(ConfigError::ValidationError("continuity.attempt_ceiling must be > 0".into()));
        }

        if self.service.workers == 0 {
            return Err(ConfigError::ValidationError("service.workers must be > 0".into()));
        }

        if self.planner.max_sub_questions == 0 {
            return Err(ConfigError::ValidationError("planner.max_sub_questions must be > 0".into()));
        }

        if !matches!(self.store.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "store.backend must be \"sqlite\" or \"memory\", got {:?}",
                self.store.backend
            )));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Whether any provider has a key, after env overrides.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some() || self.providers.values().any(|p| p.api_key.is_some())
    }

    /// The defaults rendered as TOML, written by `pursuit onboard`.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            fallback_providers: Vec::new(),
            providers: HashMap::new(),
            retrieval: RetrievalConfig::default(),
            resolver: ResolverConfig::default(),
            planner: PlannerConfig::default(),
            continuity: ContinuityConfig::default(),
            service: ServiceConfig::default(),
            tools: ToolsConfig::default(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn home_dir() -> PathBuf {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    std::env::var_os(var)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("{path} is not valid config: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_provider, "openrouter");
        assert_eq!(config.retrieval.answer_threshold, 0.65);
        assert_eq!(config.retrieval.dense.anchor_similarity, 0.88);
        assert_eq!(config.continuity.attempt_ceiling, 4);
        assert_eq!(config.retrieval.channel_priority, vec!["sparse", "dense"]);
    }

    #[test]
    fn temperature_above_two_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_outside_unit_interval_rejected() {
        let mut config = AppConfig::default();
        config.retrieval.answer_threshold = 1.2;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("answer_threshold"));
    }

    #[test]
    fn channel_priority_must_be_a_permutation() {
        let mut config = AppConfig::default();
        config.retrieval.channel_priority = vec!["dense".into(), "sparse".into()];
        assert!(config.validate().is_ok());

        config.retrieval.channel_priority = vec!["sparse".into(), "sparse".into()];
        assert!(config.validate().is_err());

        config.retrieval.channel_priority = vec!["sparse".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_attempt_ceiling_and_workers_rejected() {
        let mut config = AppConfig::default();
        config.continuity.attempt_ceiling = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.service.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bm25_parameters_validated() {
        let mut config = AppConfig::default();
        config.retrieval.sparse.k1 = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retrieval.sparse.b = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn absent_file_means_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/pursuit/config.toml")).unwrap();
        assert_eq!(config.default_model, "openai/gpt-4o-mini");
        assert_eq!(config.store.backend, StoreConfig::default().backend);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_model = "gpt-4o"

[retrieval]
answer_threshold = 0.7

[retrieval.sparse]
sigmoid_k = 1.2
sigmoid_x0 = 4.5

[continuity]
attempt_ceiling = 3
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.retrieval.answer_threshold, 0.7);
        assert_eq!(config.retrieval.sparse.sigmoid_x0, 4.5);
        assert_eq!(config.retrieval.sparse.k1, 1.5);
        assert_eq!(config.continuity.attempt_ceiling, 3);
        assert_eq!(config.continuity.retry_phrases, vec!["try again", "retry"]);
    }

    #[test]
    fn invalid_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "retrieval = 3").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        config.tools.search_api_key = Some("brave-secret".into());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(!rendered.contains("brave-secret"));
        assert!(rendered.contains(r#"api_key: "***""#));
    }

    #[test]
    fn onboarding_toml_parses_back_to_the_defaults() {
        let rendered = AppConfig::default_toml();
        assert!(rendered.contains("answer_threshold"));
        assert!(rendered.contains("attempt_ceiling"));

        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.default_provider, "openrouter");
        assert_eq!(parsed.gateway.port, GatewayConfig::default().port);
        assert_eq!(parsed.retrieval.sparse.k1, 1.5);
        assert!(parsed.validate().is_ok());
    }
}
