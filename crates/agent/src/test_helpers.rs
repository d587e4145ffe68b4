//! Shared test doubles for the pipeline stages.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pursuit_core::error::{ProviderError, RetrievalError};
use pursuit_core::message::{Message, Role};
use pursuit_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use pursuit_core::retrieval::{Channel, Decision, RetrievalCandidate, RetrievalOutcome, Retriever};

use crate::prompts;

type Rule = Box<dyn Fn(&ProviderRequest) -> Option<Result<String, ProviderError>> + Send + Sync>;

/// A provider driven by rules: the first rule that returns `Some` answers.
/// Unmatched requests get a generic text reply. Every request is recorded.
pub struct RuleProvider {
    rules: Vec<Rule>,
    delay: Option<Duration>,
    calls: Mutex<Vec<ProviderRequest>>,
}

impl RuleProvider {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn rule(
        mut self,
        rule: impl Fn(&ProviderRequest) -> Option<Result<String, ProviderError>> + Send + Sync + 'static,
    ) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Reply with `text` whenever the system prompt is `system`.
    pub fn on_system(self, system: &'static str, text: impl Into<String>) -> Self {
        let text = text.into();
        self.rule(move |req| (system_of(req) == system).then(|| Ok(text.clone())))
    }

    /// Fail whenever the system prompt is `system`.
    pub fn fail_on(self, system: &'static str) -> Self {
        self.rule(move |req| {
            (system_of(req) == system).then(|| Err(ProviderError::Network("connection reset".into())))
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ProviderRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, system: &str) -> usize {
        self.calls().iter().filter(|r| system_of(r) == system).count()
    }
}

pub fn system_of(request: &ProviderRequest) -> &str {
    request.text_of(Role::System)
}

pub fn user_of(request: &ProviderRequest) -> &str {
    request.text_of(Role::User)
}

#[async_trait]
impl Provider for RuleProvider {
    fn name(&self) -> &str {
        "rule_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .rules
            .iter()
            .find_map(|rule| rule(&request))
            .unwrap_or_else(|| Ok("mock reply".to_string()))?;
        Ok(make_text_response(&reply))
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Planner JSON for plain retrieval sub-questions.
pub fn plan_json(texts: &[&str]) -> String {
    let items: Vec<serde_json::Value> = texts
        .iter()
        .map(|t| serde_json::json!({"text": t, "capability": "retrieval", "fallback": "try_tool"}))
        .collect();
    serde_json::json!({ "sub_questions": items }).to_string()
}

/// Planner JSON with an explicit capability per sub-question.
pub fn plan_json_declaring(items: &[(&str, &str)]) -> String {
    let items: Vec<serde_json::Value> = items
        .iter()
        .map(|(t, capability)| serde_json::json!({"text": t, "capability": capability, "fallback": "try_tool"}))
        .collect();
    serde_json::json!({ "sub_questions": items }).to_string()
}

fn with_answer_stages(provider: RuleProvider) -> RuleProvider {
    provider
        .on_system(prompts::GROUNDED_SYSTEM, "Grounded answer [1].")
        .on_system(prompts::TOOL_SYSTEM, "Answer from the web [1].")
        .on_system(prompts::REASONING_SYSTEM, "Reasoned answer.")
        .on_system(prompts::INTEGRATOR_SYSTEM, "Integrated answer.")
}

/// A provider whose planner echoes the question as a single sub-question
/// and whose answer stages return fixed text.
pub fn echo_planner() -> RuleProvider {
    with_answer_stages(RuleProvider::new().rule(|req| {
        (system_of(req) == prompts::PLANNER_SYSTEM).then(|| {
            let question = user_of(req)
                .lines()
                .next()
                .and_then(|l| l.strip_prefix("Question: "))
                .unwrap_or_default();
            Ok(plan_json(&[question]))
        })
    }))
}

/// Like [`echo_planner`], but the planner always replies with `plan`,
/// whatever the user wrote.
pub fn rewriting_planner(plan: String) -> RuleProvider {
    with_answer_stages(RuleProvider::new().on_system(prompts::PLANNER_SYSTEM, plan))
}

pub fn candidate(parent_id: &str, confidence: f64, text: &str) -> RetrievalCandidate {
    RetrievalCandidate {
        parent_id: parent_id.into(),
        raw_score: confidence * 10.0,
        confidence,
        channel: Channel::Sparse,
        provenance: format!("{parent_id}#s0"),
        citation: format!("Provider Manual {parent_id}"),
        url: None,
        text: text.into(),
        published_at: None,
    }
}

/// A retriever with canned outcomes keyed by a substring of the query.
pub struct StubRetriever {
    outcomes: Vec<(String, Result<RetrievalOutcome, RetrievalError>)>,
    default: Result<RetrievalOutcome, RetrievalError>,
    delay: Option<Duration>,
    queries: Mutex<Vec<(String, Vec<String>)>>,
}

impl StubRetriever {
    /// Abstains on everything unless a rule matches.
    pub fn abstaining() -> Self {
        Self {
            outcomes: Vec::new(),
            default: Ok(RetrievalOutcome {
                candidates: vec![],
                decision: Decision::Abstain { partial_channel: false },
                failed_channel: None,
            }),
            delay: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        let mut stub = Self::abstaining();
        stub.default = Err(RetrievalError::Unavailable {
            sparse: "index offline".into(),
            dense: "connection refused".into(),
        });
        stub
    }

    /// Answer confidently when the query contains `needle` (case-insensitive).
    pub fn answers(mut self, needle: &str, candidates: Vec<RetrievalCandidate>) -> Self {
        self.outcomes.push((
            needle.to_lowercase(),
            Ok(RetrievalOutcome {
                candidates,
                decision: Decision::Answer,
                failed_channel: None,
            }),
        ));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queries(&self) -> Vec<(String, Vec<String>)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for StubRetriever {
    async fn retrieve(&self, query: &str, filters: &[String]) -> Result<RetrievalOutcome, RetrievalError> {
        self.queries.lock().unwrap().push((query.to_string(), filters.to_vec()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let lower = query.to_lowercase();
        self.outcomes
            .iter()
            .find(|(needle, _)| lower.contains(needle))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_else(|| self.default.clone())
    }

    fn corpus_summary(&self) -> String {
        "2 published document sections covering florida".into()
    }
}

/// Tool double returning fixed output or a failure.
pub struct StubTool {
    pub name: &'static str,
    pub output: Result<String, String>,
    pub calls: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl StubTool {
    pub fn ok(name: &'static str, output: &str) -> Self {
        Self {
            name,
            output: Ok(output.to_string()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            name,
            output: Err("upstream returned 503".to_string()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl pursuit_core::tool::Tool for StubTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "stub tool"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<pursuit_core::tool::ToolResult, pursuit_core::error::ToolError> {
        self.calls.lock().unwrap().push(arguments);
        match &self.output {
            Ok(output) => Ok(pursuit_core::tool::ToolResult::found(
                output.clone(),
                vec![format!("https://example.org/{}", self.name)],
            )),
            Err(reason) => Err(pursuit_core::error::ToolError::ExecutionFailed {
                tool_name: self.name.to_string(),
                reason: reason.clone(),
            }),
        }
    }
}

/// Counts tool invocations by name across clones of the registry's tools.
#[derive(Default, Clone)]
pub struct ToolCalls(pub HashMap<&'static str, Arc<Mutex<Vec<serde_json::Value>>>>);

impl ToolCalls {
    pub fn count(&self, name: &str) -> usize {
        self.0.get(name).map(|c| c.lock().unwrap().len()).unwrap_or(0)
    }
}

/// Build a registry from stub tools, returning their call logs.
pub fn stub_registry(tools: Vec<StubTool>) -> (pursuit_core::tool::ToolRegistry, ToolCalls) {
    let mut registry = pursuit_core::tool::ToolRegistry::new();
    let mut calls = ToolCalls::default();
    for tool in tools {
        calls.0.insert(tool.name, tool.calls.clone());
        registry.register(Box::new(tool));
    }
    (registry, calls)
}
