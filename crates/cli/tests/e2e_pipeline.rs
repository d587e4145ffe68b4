//! End-to-end tests for the Pursuit turn pipeline.
//!
//! These drive the full service (submit, worker pool, orchestrator, SQLite
//! store) with a scripted LLM provider, a recording retriever and stub
//! tools, and check the behaviour a user sees across turns.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use pursuit_agent::{ChatService, SubmitRequest, bootstrap, prompts};
use pursuit_config::AppConfig;
use pursuit_core::answer::{ResolutionState, TurnResponse};
use pursuit_core::blueprint::{Strategy, ToolKind};
use pursuit_core::error::{ProviderError, RetrievalError, ToolError};
use pursuit_core::message::{Message, Role};
use pursuit_core::objective::{ObjectiveStatus, SubObjectiveStatus};
use pursuit_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use pursuit_core::retrieval::{Channel, Decision, RetrievalCandidate, RetrievalOutcome, Retriever};
use pursuit_core::thread::{CorrelationId, Thread, ThreadId, TurnStatus};
use pursuit_core::tool::{Tool, ToolRegistry, ToolResult};
use pursuit_store::{SqliteStore, StoreHandles};

const CARE: &str = "A member has income of $1500/month and two chronic conditions, do they qualify for care management?";
const WAIT: Duration = Duration::from_secs(10);

// ── Scripted provider ───────────────────────────────────────────────────

type Script = Box<dyn Fn(&str, &str) -> Option<String> + Send + Sync>;

/// Replies by system prompt; the planner echoes the question unless a
/// script claims the request first. Every request is recorded.
struct ScriptedProvider {
    scripts: Vec<Script>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            scripts: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn script(mut self, script: impl Fn(&str, &str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.scripts.push(Box::new(script));
        self
    }

    fn calls_to(&self, system: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(s, _)| s == system).count()
    }
}

fn plan_json(items: &[(&str, Option<&str>)]) -> String {
    let items: Vec<serde_json::Value> = items
        .iter()
        .map(|(text, objective_ref)| {
            serde_json::json!({
                "text": text,
                "capability": "retrieval",
                "fallback": "try_tool",
                "objective_ref": objective_ref,
            })
        })
        .collect();
    serde_json::json!({ "sub_questions": items }).to_string()
}

/// Planner JSON with an explicit capability per sub-question.
fn plan_json_declaring(items: &[(&str, &str)]) -> String {
    let items: Vec<serde_json::Value> = items
        .iter()
        .map(|(text, capability)| serde_json::json!({"text": text, "capability": capability, "fallback": "try_tool"}))
        .collect();
    serde_json::json!({ "sub_questions": items }).to_string()
}

/// A planner that answers every question with the same rewritten plan.
fn rewriting_planner(plan: String) -> ScriptedProvider {
    ScriptedProvider::new().script(move |system, _| (system == prompts::PLANNER_SYSTEM).then(|| plan.clone()))
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let system = request.text_of(Role::System).to_string();
        let user = request.text_of(Role::User).to_string();
        self.calls.lock().unwrap().push((system.clone(), user.clone()));

        let scripted = self.scripts.iter().find_map(|s| s(&system, &user));
        let text = match scripted {
            Some(text) => text,
            None if system == prompts::PLANNER_SYSTEM => {
                let question = user
                    .lines()
                    .next()
                    .and_then(|l| l.strip_prefix("Question: "))
                    .unwrap_or_default();
                plan_json(&[(question, None)])
            }
            None if system == prompts::GROUNDED_SYSTEM => "Grounded answer [1].".into(),
            None if system == prompts::TOOL_SYSTEM => "Answer from the web [1].".into(),
            None if system == prompts::INTEGRATOR_SYSTEM => "Integrated answer.".into(),
            None => "Reasoned answer.".into(),
        };

        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "e2e-model".into(),
        })
    }
}

// ── Recording retriever ─────────────────────────────────────────────────

/// Answers when the query contains a needle, abstains otherwise.
struct RecordingRetriever {
    needles: Vec<(&'static str, &'static str)>,
    queries: Mutex<Vec<String>>,
}

impl RecordingRetriever {
    fn new(needles: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            needles,
            queries: Mutex::new(Vec::new()),
        }
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for RecordingRetriever {
    async fn retrieve(&self, query: &str, _filters: &[String]) -> Result<RetrievalOutcome, RetrievalError> {
        self.queries.lock().unwrap().push(query.to_string());
        let lower = query.to_lowercase();
        let hit = self.needles.iter().find(|(needle, _)| lower.contains(needle));
        Ok(match hit {
            Some((needle, text)) => RetrievalOutcome {
                candidates: vec![RetrievalCandidate {
                    parent_id: format!("manual-{}", needle.replace(' ', "-")),
                    raw_score: 8.0,
                    confidence: 0.85,
                    channel: Channel::Sparse,
                    provenance: format!("manual-{needle}#s0"),
                    citation: "Provider Manual".into(),
                    url: None,
                    text: (*text).into(),
                    published_at: None,
                }],
                decision: Decision::Answer,
                failed_channel: None,
            },
            None => RetrievalOutcome {
                candidates: Vec::new(),
                decision: Decision::Abstain { partial_channel: false },
                failed_channel: None,
            },
        })
    }
}

// ── Stub search tool ────────────────────────────────────────────────────

struct SearchStub {
    ok: bool,
    calls: Arc<Mutex<usize>>,
}

#[async_trait]
impl Tool for SearchStub {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the public web"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": { "query": { "type": "string" } } })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        *self.calls.lock().unwrap() += 1;
        if self.ok {
            Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: "1. Florida Medicaid eligibility - https://ahca.myflorida.com/medicaid".into(),
                sources: vec!["https://ahca.myflorida.com/medicaid".into()],
            })
        } else {
            Err(ToolError::ExecutionFailed {
                tool_name: "web_search".into(),
                reason: "upstream returned 503".into(),
            })
        }
    }
}

// ── Stub page fetch tool ────────────────────────────────────────────────

struct FetchStub {
    urls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Tool for FetchStub {
    fn name(&self) -> &str {
        "page_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page by URL"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": { "url": { "type": "string" } } })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let url = arguments["url"].as_str().unwrap_or_default().to_string();
        self.urls.lock().unwrap().push(url.clone());
        Ok(ToolResult::found(
            "Eligibility: household income at or below 138% of the federal poverty level.",
            vec![url],
        ))
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

struct Harness {
    service: ChatService,
    provider: Arc<ScriptedProvider>,
    retriever: Arc<RecordingRetriever>,
    searches: Arc<Mutex<usize>>,
    fetches: Arc<Mutex<Vec<String>>>,
}

async fn harness(provider: ScriptedProvider, retriever: RecordingRetriever, search_ok: bool) -> Harness {
    let provider = Arc::new(provider);
    let retriever = Arc::new(retriever);
    let searches = Arc::new(Mutex::new(0));
    let fetches = Arc::new(Mutex::new(Vec::new()));

    let mut tools = ToolRegistry::new();
    tools.register(Box::new(SearchStub {
        ok: search_ok,
        calls: searches.clone(),
    }));
    tools.register(Box::new(FetchStub { urls: fetches.clone() }));

    let store = SqliteStore::new("sqlite::memory:").await.expect("in-memory SQLite should open");
    let service = bootstrap::assemble(
        &AppConfig::default(),
        provider.clone(),
        retriever.clone(),
        tools,
        StoreHandles::from_backend(Arc::new(store)),
    );

    Harness {
        service,
        provider,
        retriever,
        searches,
        fetches,
    }
}

impl Harness {
    async fn ask(&self, thread: &str, message: &str) -> TurnResponse {
        let receipt = self
            .service
            .submit(SubmitRequest::new(message).on_thread(thread))
            .await
            .expect("submit should succeed");
        let record = self
            .service
            .wait_for(&receipt.correlation_id, WAIT)
            .await
            .expect("turn should be recorded");
        assert_eq!(record.status, TurnStatus::Completed, "turn for {message:?} did not complete");
        record.response.expect("completed turn should carry a response")
    }

    async fn thread(&self, id: &str) -> Thread {
        self.service.thread(&ThreadId::from(id)).await.expect("thread should exist")
    }

    fn searches(&self) -> usize {
        *self.searches.lock().unwrap()
    }

    fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

// ── Scenarios ───────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_patient_identifier_is_refused_without_retrieval() {
    let h = harness(ScriptedProvider::new(), RecordingRetriever::new(vec![]), true).await;

    let response = h.ask("t-a", "What is the status for MRN 98765?").await;

    assert!(h.retriever.queries().is_empty());
    assert_eq!(h.searches(), 0);
    assert_eq!(response.sub_answers.len(), 1);
    assert_eq!(response.sub_answers[0].strategy, Strategy::Refusal);
    assert_eq!(response.sub_answers[0].state, ResolutionState::Refused);
    assert!(response.message.contains("individual patient"));
    assert!(response.sources.is_empty());
}

#[tokio::test]
async fn scenario_b_search_request_uses_the_tool_only() {
    let h = harness(ScriptedProvider::new(), RecordingRetriever::new(vec![]), true).await;

    let response = h.ask("t-b", "Search for Florida Medicaid eligibility requirements").await;

    assert!(h.retriever.queries().is_empty());
    assert_eq!(h.searches(), 1);
    assert_eq!(response.sub_answers[0].strategy, Strategy::Tool(ToolKind::WebSearch));
    assert_eq!(response.message, "Answer from the web [1].");
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.objective_status, Some(ObjectiveStatus::Solved));
}

#[tokio::test]
async fn scenario_a_holds_when_the_planner_paraphrases_the_identifier_away() {
    let plan = plan_json_declaring(&[("What is the member's current status?", "web_search")]);
    let h = harness(rewriting_planner(plan), RecordingRetriever::new(vec![]), true).await;

    let response = h.ask("t-a2", "What is the status for MRN 98765?").await;

    assert_eq!(h.provider.calls_to(prompts::PLANNER_SYSTEM), 0);
    assert!(h.retriever.queries().is_empty());
    assert_eq!(h.searches(), 0);
    assert_eq!(response.sub_answers[0].strategy, Strategy::Refusal);
    assert_eq!(response.sub_answers[0].state, ResolutionState::Refused);
    assert!(response.message.contains("individual patient"));
}

#[tokio::test]
async fn scenario_b_holds_when_the_planner_drops_the_search_phrase() {
    let plan = plan_json_declaring(&[("What are the eligibility rules?", "reasoning")]);
    let h = harness(rewriting_planner(plan), RecordingRetriever::new(vec![]), true).await;

    let response = h.ask("t-b2", "Search for Florida Medicaid eligibility requirements").await;

    assert!(h.retriever.queries().is_empty());
    assert_eq!(h.searches(), 1);
    assert_eq!(response.sub_answers[0].strategy, Strategy::Tool(ToolKind::WebSearch));
    assert_eq!(response.sub_answers[0].state, ResolutionState::Answered);
}

#[tokio::test]
async fn scrape_with_url_fetches_the_page_even_after_a_rewrite() {
    let plan = plan_json_declaring(&[("Summarize Florida Medicaid eligibility from the agency site", "retrieval")]);
    let h = harness(rewriting_planner(plan), RecordingRetriever::new(vec![]), true).await;

    let response = h
        .ask("t-fetch", "scrape https://ahca.myflorida.com/medicaid and summarize eligibility")
        .await;

    assert!(h.retriever.queries().is_empty());
    assert_eq!(h.searches(), 0);
    assert_eq!(h.fetches(), vec!["https://ahca.myflorida.com/medicaid".to_string()]);
    assert_eq!(response.sub_answers[0].strategy, Strategy::Tool(ToolKind::PageFetch));
    assert_eq!(response.sub_answers[0].state, ResolutionState::Answered);
    assert_eq!(response.sources.len(), 1);
}

#[tokio::test]
async fn scenario_c_follow_up_carries_the_earlier_context() {
    let retriever = RecordingRetriever::new(vec![(
        "care management",
        "Members with two or more chronic conditions qualify for care management.",
    )]);
    let h = harness(ScriptedProvider::new(), retriever, false).await;

    let first = h.ask("t-c", CARE).await;
    assert!(first.is_substantive());
    assert_eq!(first.sub_answers[0].strategy, Strategy::Retrieval);

    let second = h.ask("t-c", "how about for United Healthcare").await;
    let queries = h.retriever.queries();
    assert_eq!(queries.len(), 2);
    let merged = &queries[1];
    assert!(merged.contains("$1500/month"), "{merged}");
    assert!(merged.contains("two chronic conditions"), "{merged}");
    assert!(merged.contains("United Healthcare"), "{merged}");
    assert!(second.is_substantive());
    assert_eq!(h.searches(), 0);

    let thread = h.thread("t-c").await;
    assert_eq!(thread.turns.len(), 2);
    assert!(thread.context.is_followup);
}

#[tokio::test]
async fn follow_up_answering_the_failed_part_solves_the_objective() {
    let provider = ScriptedProvider::new().script(|system, user| {
        if system != prompts::PLANNER_SYSTEM {
            return None;
        }
        if user.starts_with("Question: Does Florida cover adult dental, and what is the Ohio CHIP asset limit?") {
            return Some(plan_json(&[
                ("Does Florida Medicaid cover adult dental?", None),
                ("What is the Ohio CHIP asset limit?", None),
            ]));
        }
        if user.starts_with("Question: For a household of four") {
            return Some(plan_json(&[("Ohio CHIP asset limit for a household of four", Some("so2"))]));
        }
        None
    });
    let retriever = RecordingRetriever::new(vec![
        ("adult dental", "Adult dental is covered for emergencies."),
        ("household of four", "A household of four has no CHIP asset test in Ohio."),
    ]);
    let h = harness(provider, retriever, false).await;

    let first = h
        .ask("t-carry", "Does Florida cover adult dental, and what is the Ohio CHIP asset limit?")
        .await;
    assert_eq!(first.objective_status, Some(ObjectiveStatus::Active));
    assert!(first.user_ask.is_some());

    let before = h.thread("t-carry").await.objective.expect("objective after turn one");
    assert_eq!(before.sub_objectives.len(), 2);
    assert_eq!(before.sub_objectives[0].status, SubObjectiveStatus::Answered);
    assert_ne!(before.sub_objectives[1].status, SubObjectiveStatus::Answered);

    let second = h.ask("t-carry", "For a household of four, what is the limit?").await;
    assert_eq!(second.objective_status, Some(ObjectiveStatus::Solved));

    let after = h.thread("t-carry").await.objective.expect("objective after turn two");
    assert_eq!(after.id, before.id);
    assert_eq!(after.sub_objectives.len(), 2);
    assert_eq!(after.sub_objectives[0], before.sub_objectives[0]);
    assert_eq!(after.sub_objectives[1].status, SubObjectiveStatus::Answered);
}

#[tokio::test]
async fn attempt_ceiling_makes_the_objective_incomplete_until_retry() {
    let h = harness(ScriptedProvider::new(), RecordingRetriever::new(vec![]), false).await;
    let question = "What is the Ohio CHIP asset limit?";

    for attempt in 1..=3 {
        let response = h.ask("t-ceiling", question).await;
        assert_eq!(response.objective_status, Some(ObjectiveStatus::Active), "attempt {attempt}");
        assert!(response.user_ask.is_some(), "attempt {attempt}");
    }

    let fourth = h.ask("t-ceiling", question).await;
    assert_eq!(fourth.objective_status, Some(ObjectiveStatus::Incomplete));
    assert!(fourth.user_ask.is_none());
    let objective = h.thread("t-ceiling").await.objective.expect("objective");
    assert_eq!(objective.attempts, 4);

    let fifth = h.ask("t-ceiling", question).await;
    assert_eq!(fifth.objective_status, Some(ObjectiveStatus::Incomplete));
    let objective = h.thread("t-ceiling").await.objective.expect("objective");
    assert_eq!(objective.attempts, 4);

    let retried = h.ask("t-ceiling", "try again").await;
    assert_eq!(retried.objective_status, Some(ObjectiveStatus::Active));
    let after_retry = h.thread("t-ceiling").await.objective.expect("objective");
    assert_eq!(after_retry.id, objective.id);
    assert_eq!(after_retry.attempts, 1);
    assert_eq!(h.retriever.queries().last().map(String::as_str), Some(question));
}

#[tokio::test]
async fn answered_questions_elsewhere_do_not_exhaust_an_open_item() {
    let retriever = RecordingRetriever::new(vec![
        ("adult dental", "Adult dental is covered for emergencies."),
        ("transportation", "Non-emergency transportation is covered for Medicaid members."),
        ("vision", "Texas CHIP covers one eye exam and glasses per year."),
    ]);
    let h = harness(ScriptedProvider::new(), retriever, false).await;
    let closure = AppConfig::default().continuity.closure_message;

    let first = h.ask("t-open", "What is the Ohio CHIP asset limit?").await;
    assert_eq!(first.objective_status, Some(ObjectiveStatus::Active));

    for question in [
        "Does Florida Medicaid cover adult dental?",
        "Is non-emergency transportation covered in Ohio?",
        "What vision benefits does Texas CHIP include?",
    ] {
        let response = h.ask("t-open", question).await;
        assert!(response.is_substantive(), "{question}");
        assert_ne!(response.objective_status, Some(ObjectiveStatus::Incomplete), "{question}");
        assert!(!response.message.contains(&closure), "{question}");
    }

    let objective = h.thread("t-open").await.objective.expect("objective");
    assert_eq!(objective.attempts, 1);
    assert_eq!(objective.status, ObjectiveStatus::Active);
}

#[tokio::test]
async fn resubmitting_a_correlation_id_does_not_reprocess() {
    let retriever = RecordingRetriever::new(vec![("adult dental", "Adult dental is covered for emergencies.")]);
    let h = harness(ScriptedProvider::new(), retriever, false).await;
    let request = SubmitRequest::new("Does Florida Medicaid cover adult dental?")
        .on_thread("t-idem")
        .with_correlation_id("idem-1");

    let first = h.service.submit(request.clone()).await.unwrap();
    let record = h.service.wait_for(&first.correlation_id, WAIT).await.unwrap();
    assert_eq!(record.status, TurnStatus::Completed);

    let second = h.service.submit(request).await.unwrap();
    assert!(second.duplicate);
    assert_eq!(second.status, TurnStatus::Completed);
    assert_eq!(h.provider.calls_to(prompts::PLANNER_SYSTEM), 1);
    assert_eq!(h.retriever.queries().len(), 1);

    let polled = h.service.poll(&CorrelationId::from("idem-1")).await.unwrap();
    assert_eq!(polled.response.map(|r| r.message), record.response.map(|r| r.message));
    assert_eq!(h.thread("t-idem").await.turns.len(), 1);
}

#[tokio::test]
async fn empty_message_still_gets_a_structured_reply() {
    let h = harness(ScriptedProvider::new(), RecordingRetriever::new(vec![]), false).await;

    let response = h.ask("t-empty", "").await;

    assert!(!response.message.is_empty());
    assert!(h.retriever.queries().is_empty());
    assert_eq!(h.provider.calls_to(prompts::PLANNER_SYSTEM), 0);
}
