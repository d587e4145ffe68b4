//! The stage pipeline for one turn.
//!
//! classify → plan → route → resolve (fan-out) → update continuity →
//! integrate → publish
//!
//! Every stage runs inside a panic boundary with a degraded default, so a
//! turn always reaches publish. Publish records the outcome in the turn
//! ledger (falling back to a minimal response) before the terminal
//! progress event goes out.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use serde_json::json;
use tracing::{error, info, warn};

use pursuit_core::answer::{FailureReason, ResolutionState, SubQuestionResolution, TurnResponse};
use pursuit_core::blueprint::{Blueprint, BlueprintEntry, RoutingRule, Strategy};
use pursuit_core::error::StoreError;
use pursuit_core::event::{EventBus, ProgressEvent, ProgressKind};
use pursuit_core::objective::{MasterObjective, ObjectiveStatus};
use pursuit_core::plan::{Classification, FallbackRule, Plan, SubQuestionKind};
use pursuit_core::store::{ProgressLog, ThreadStore, TurnLedger};
use pursuit_core::thread::{ContinuityContext, CorrelationId, Thread, ThreadId, Turn, TurnStatus};

use crate::continuity::{ContinuityTracker, ContinuityUpdate, Intent};
use crate::cues::MessageCues;
use crate::integrator::{self, Integrated, Integrator};
use crate::phi;
use crate::planner::{self, Planner};
use crate::resolver::Resolver;
use crate::router;

const SAVE_ATTEMPTS: usize = 3;

pub const CANCEL_REPLY: &str = "Understood, I've stopped working on that. Ask a new question whenever you're ready.";
pub const EMPTY_REPLY: &str = "I didn't receive a question. What would you like to know about a health plan or program?";

/// One turn to run.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub correlation_id: CorrelationId,
    pub thread_id: ThreadId,
    pub message: String,
    /// Re-run this earlier turn instead of treating `message` as new
    pub retry_of: Option<CorrelationId>,
}

/// Appends progress events to the log and wakes live readers.
#[derive(Clone)]
pub struct ProgressSink {
    log: Arc<dyn ProgressLog>,
    bus: Arc<EventBus>,
}

impl ProgressSink {
    pub fn new(log: Arc<dyn ProgressLog>, bus: Arc<EventBus>) -> Self {
        Self { log, bus }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Progress is advisory: a failed append is logged, never raised.
    pub async fn emit(&self, id: &CorrelationId, kind: ProgressKind, payload: serde_json::Value) -> Option<ProgressEvent> {
        match self.log.append(id, kind, payload).await {
            Ok(event) => {
                self.bus.publish(event.clone());
                Some(event)
            }
            Err(e) => {
                warn!(correlation_id = %id, kind = %kind, error = %e, "Failed to append progress event");
                None
            }
        }
    }

    pub async fn thinking(&self, id: &CorrelationId, line: impl Into<String>) {
        self.emit(id, ProgressKind::Thinking, json!({ "line": line.into() })).await;
    }
}

pub struct Orchestrator {
    planner: Planner,
    resolver: Resolver,
    tracker: ContinuityTracker,
    integrator: Integrator,
    threads: Arc<dyn ThreadStore>,
    turns: Arc<dyn TurnLedger>,
    progress: ProgressSink,
}

/// Everything a finished pipeline hands to persistence.
struct TurnResult {
    thread: Thread,
    turn: Turn,
    objective: Option<MasterObjective>,
    context: ContinuityContext,
    /// How the turn moved the objective; `None` when it left the thread's
    /// objective and context alone.
    intent: Option<Intent>,
}

impl Orchestrator {
    pub fn new(
        planner: Planner,
        resolver: Resolver,
        tracker: ContinuityTracker,
        integrator: Integrator,
        threads: Arc<dyn ThreadStore>,
        turns: Arc<dyn TurnLedger>,
        progress: ProgressSink,
    ) -> Self {
        Self {
            planner,
            resolver,
            tracker,
            integrator,
            threads,
            turns,
            progress,
        }
    }

    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    pub fn tracker(&self) -> &ContinuityTracker {
        &self.tracker
    }

    /// Run one turn to completion. Always returns a structured response and
    /// always leaves an outcome in the turn ledger.
    pub async fn run(&self, request: TurnRequest) -> TurnResponse {
        let cid = request.correlation_id.clone();
        info!(correlation_id = %cid, thread_id = %request.thread_id, "Turn started");

        let (result, _) = guarded("pipeline", &cid, self.pipeline(&request).map(Some), || None).await;
        let response = match result {
            Some(result) => {
                let mut response = result.turn.response.clone();
                match self.persist(&cid, result).await {
                    Ok(status) => response.objective_status = status,
                    Err(e) => {
                        error!(correlation_id = %cid, error = %e, "Thread not saved, publishing degraded");
                        response.degraded = true;
                    }
                }
                response
            }
            None => TurnResponse::minimal(
                cid.clone(),
                request.thread_id.clone(),
                FailureReason::MalformedInput.user_ask(request.message.trim()),
            ),
        };

        self.publish(&request, response).await
    }

    async fn pipeline(&self, request: &TurnRequest) -> TurnResult {
        let cid = &request.correlation_id;
        let (thread, mut degraded) = self.load_thread(&request.thread_id).await;

        let mut intent = if request.retry_of.is_some() {
            Intent::Retry
        } else {
            self.tracker.intent(&request.message)
        };

        // A retry re-runs the earlier turn's question
        let mut message = request.message.clone();
        let mut retried_classification = None;
        if intent == Intent::Retry {
            let target = request
                .retry_of
                .as_ref()
                .and_then(|id| thread.find_turn(id))
                .or_else(|| {
                    thread
                        .turns
                        .iter()
                        .rev()
                        .find(|t| self.tracker.intent(&t.message) == Intent::Ask)
                });
            match target {
                Some(turn) => {
                    self.progress
                        .thinking(cid, format!("Retrying \"{}\"", turn.message))
                        .await;
                    message = turn.message.clone();
                    retried_classification = Some(turn.classification);
                }
                None => intent = Intent::Ask,
            }
        }

        if intent == Intent::Cancel {
            return self.cancel(request, thread, message).await;
        }

        if message.trim().is_empty() {
            let plan = Plan::minimal(&message, "empty message");
            let mut response = TurnResponse::minimal(cid.clone(), thread.id.clone(), EMPTY_REPLY);
            response.degraded = degraded;
            let objective = thread.objective.clone();
            let context = thread.context.clone();
            return TurnResult {
                turn: turn(cid, &message, Classification::NewQuestion, plan, response),
                thread,
                objective,
                context,
                intent: None,
            };
        }

        // Classify
        let classification = match retried_classification {
            Some(c) => c,
            None => {
                let (c, panicked) = guarded_sync("classify", cid, || {
                    planner::classify(&message, &thread.context, thread.last_turn().is_some())
                }, || Classification::NewQuestion);
                degraded |= panicked;
                c
            }
        };
        self.progress
            .thinking(cid, format!("Understood this as {}", describe(classification)))
            .await;

        // Plan. A message naming a patient is refused without asking the model.
        let plan = if let Some(kind) = phi::detect(&message) {
            info!(correlation_id = %cid, identifier = ?kind, "Patient identifier in message, skipping the planner");
            Plan::restricted(&message)
        } else {
            let (plan, panicked) = guarded(
                "plan",
                cid,
                self.planner.plan(&message, classification, &thread.context, thread.objective.as_ref()),
                || Plan::minimal(&message, "planner stage failed"),
            )
            .await;
            degraded |= panicked;
            plan
        };
        self.progress
            .thinking(cid, format!("Broke the question into {} part(s)", plan.len()))
            .await;

        // Route
        let routing_context = ContinuityContext {
            is_followup: classification.is_followup(),
            ..thread.context.clone()
        };
        let message_cues = MessageCues::of(&message);
        let (blueprint, panicked) = guarded_sync(
            "route",
            cid,
            || router::route(&plan, &routing_context, &message_cues),
            || degraded_blueprint(&plan),
        );
        degraded |= panicked;
        let routes = blueprint
            .iter()
            .map(|e| format!("{} via {}", e.sub_question_id, e.strategy.label()))
            .collect::<Vec<_>>()
            .join(", ");
        self.progress.thinking(cid, format!("Routing {routes}")).await;

        // Resolve, all sub-questions concurrently
        let resolutions: Vec<SubQuestionResolution> =
            join_all(blueprint.iter().map(|entry| self.resolve_one(cid, entry))).await;

        // Continuity
        let (update, panicked) = guarded_sync(
            "continuity",
            cid,
            || {
                self.tracker.update(
                    thread.objective.clone(),
                    intent,
                    classification,
                    &message,
                    &plan,
                    &resolutions,
                )
            },
            || ContinuityUpdate {
                objective: thread.objective.clone(),
                user_ask: None,
                closure: None,
            },
        );
        degraded |= panicked;

        // Integrate
        self.progress.thinking(cid, "Writing the answer").await;
        let (integrated, panicked) = guarded(
            "integrate",
            cid,
            self.integrator.integrate(&message, &resolutions, &update),
            || integrator::plain(&resolutions, &update),
        )
        .await;
        degraded |= panicked;

        let Integrated { message: text, sources } = integrated;
        let response = TurnResponse {
            correlation_id: cid.clone(),
            thread_id: thread.id.clone(),
            message: if text.trim().is_empty() {
                FailureReason::MalformedInput.user_ask(message.trim())
            } else {
                text
            },
            sub_answers: resolutions,
            sources,
            objective_status: update.objective.as_ref().map(|o| o.status),
            user_ask: update.user_ask.clone(),
            degraded,
        };

        let context = ContinuityContext {
            last_refined_query: router::primary_query(&blueprint).or_else(|| thread.context.last_refined_query.clone()),
            jurisdiction_summary: router::settled_jurisdiction(&blueprint, &routing_context),
            is_followup: classification.is_followup(),
            last_sources: response.sources.iter().map(|c| c.source_id.clone()).collect(),
            last_answer_substantive: response.is_substantive(),
            awaiting_user_input: response.user_ask.is_some(),
        };

        TurnResult {
            turn: turn(cid, &message, classification, plan, response),
            thread,
            objective: update.objective,
            context,
            intent: Some(intent),
        }
    }

    async fn cancel(&self, request: &TurnRequest, thread: Thread, message: String) -> TurnResult {
        let cid = &request.correlation_id;
        self.progress
            .thinking(cid, "Stopping work on the current objective")
            .await;
        let plan = Plan::minimal(&message, "cancellation request");
        let update = self
            .tracker
            .update(thread.objective.clone(), Intent::Cancel, Classification::NewQuestion, &message, &plan, &[]);

        let mut response = TurnResponse::minimal(cid.clone(), thread.id.clone(), CANCEL_REPLY);
        response.degraded = false;
        response.objective_status = update.objective.as_ref().map(|o| o.status);

        TurnResult {
            turn: turn(cid, &message, Classification::NewQuestion, plan, response),
            thread,
            objective: update.objective,
            context: ContinuityContext::default(),
            intent: Some(Intent::Cancel),
        }
    }

    async fn resolve_one(&self, cid: &CorrelationId, entry: &BlueprintEntry) -> SubQuestionResolution {
        let (resolution, _) = guarded("resolve", cid, self.resolver.resolve(entry), || {
            SubQuestionResolution::failed(
                &entry.sub_question_id,
                &entry.question,
                entry.strategy,
                ResolutionState::NoEvidence,
                FailureReason::NoEvidence,
            )
        })
        .await;

        self.progress
            .emit(
                cid,
                ProgressKind::SubQuestion,
                json!({
                    "sub_question_id": resolution.sub_question_id,
                    "question": resolution.question,
                    "strategy": resolution.strategy.label(),
                    "state": resolution.state,
                    "fallback_used": resolution.fallback_used,
                }),
            )
            .await;
        resolution
    }

    async fn load_thread(&self, id: &ThreadId) -> (Thread, bool) {
        match self.threads.load(id).await {
            Ok(Some(thread)) => (thread, false),
            Ok(None) => (Thread::new(id.clone()), false),
            Err(e) => {
                warn!(thread_id = %id, error = %e, "Thread load failed, continuing with an empty thread");
                (Thread::new(id.clone()), true)
            }
        }
    }

    /// Append the turn and write the thread. On a version conflict the
    /// thread is re-read and the turn's objective change is replayed on top
    /// of whatever the other writer saved. Returns the saved objective status.
    async fn persist(&self, cid: &CorrelationId, result: TurnResult) -> Result<Option<ObjectiveStatus>, StoreError> {
        let TurnResult {
            mut thread,
            mut turn,
            mut objective,
            mut context,
            intent,
        } = result;

        let mut attempt = 1;
        loop {
            let expected = thread.version;
            let mut next = thread.clone();
            next.turns.push(turn.clone());
            next.objective = objective.clone();
            next.context = context.clone();
            next.updated_at = Utc::now();

            match self.threads.save(&next, expected).await {
                Ok(version) => {
                    info!(correlation_id = %cid, thread_id = %next.id, version, attempt, "Thread saved");
                    return Ok(turn.response.objective_status);
                }
                Err(StoreError::Conflict { expected, found, .. }) if attempt < SAVE_ATTEMPTS => {
                    warn!(correlation_id = %cid, expected, found, attempt, "Thread version conflict, replaying on the latest copy");
                    thread = self.threads.load(&thread.id).await?.unwrap_or_else(|| Thread::new(thread.id.clone()));
                    match intent {
                        Some(intent) => {
                            let update = self.tracker.update(
                                thread.objective.clone(),
                                intent,
                                turn.classification,
                                &turn.message,
                                &turn.plan,
                                &turn.response.sub_answers,
                            );
                            objective = update.objective;
                            turn.response.objective_status = objective.as_ref().map(|o| o.status);
                        }
                        None => {
                            objective = thread.objective.clone();
                            context = thread.context.clone();
                        }
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record the outcome, then emit the terminal event.
    async fn publish(&self, request: &TurnRequest, response: TurnResponse) -> TurnResponse {
        let cid = &request.correlation_id;

        let kind = match self.turns.finish(cid, TurnStatus::Completed, &response).await {
            Ok(()) => ProgressKind::Completed,
            Err(e) => {
                error!(correlation_id = %cid, error = %e, "Failed to record response, writing minimal outcome");
                let minimal = TurnResponse::minimal(cid.clone(), request.thread_id.clone(), response.message.clone());
                match self.turns.finish(cid, TurnStatus::Failed, &minimal).await {
                    Ok(()) => ProgressKind::Failed,
                    Err(e) => {
                        error!(correlation_id = %cid, error = %e, "Failed to record any outcome");
                        ProgressKind::Failed
                    }
                }
            }
        };

        let payload = serde_json::to_value(&response)
            .unwrap_or_else(|e| json!({ "message": response.message, "error": e.to_string() }));
        self.progress.emit(cid, kind, payload).await;

        info!(
            correlation_id = %cid,
            sub_questions = response.sub_answers.len(),
            objective = ?response.objective_status,
            degraded = response.degraded,
            "Turn published"
        );
        response
    }
}

fn turn(cid: &CorrelationId, message: &str, classification: Classification, plan: Plan, response: TurnResponse) -> Turn {
    Turn {
        correlation_id: cid.clone(),
        message: message.to_string(),
        classification,
        plan,
        response,
        status: TurnStatus::Completed,
        created_at: Utc::now(),
    }
}

fn describe(classification: Classification) -> &'static str {
    match classification {
        Classification::NewQuestion => "a new question",
        Classification::SlotFill => "details for an open item",
        Classification::FollowUpContinuation => "a follow-up to the previous answer",
    }
}

/// Routing without cue rules: patient identifiers are still refused,
/// everything else goes to reasoning.
fn degraded_blueprint(plan: &Plan) -> Blueprint {
    plan.sub_questions
        .iter()
        .map(|sq| {
            let refuse = sq.kind == SubQuestionKind::PatientRestricted || phi::contains_patient_identifier(&sq.text);
            BlueprintEntry {
                sub_question_id: sq.id.clone(),
                question: sq.text.clone(),
                strategy: if refuse { Strategy::Refusal } else { Strategy::Reasoning },
                query: if refuse { String::new() } else { sq.text.clone() },
                filter_tags: Vec::new(),
                fallback: FallbackRule::None,
                rule: if refuse { RoutingRule::PatientIdentifier } else { RoutingRule::Declared },
                merged: false,
            }
        })
        .collect()
}

/// Run `fut`, turning a panic into `fallback()`. The flag reports a panic.
async fn guarded<T>(
    stage: &'static str,
    cid: &CorrelationId,
    fut: impl Future<Output = T>,
    fallback: impl FnOnce() -> T,
) -> (T, bool) {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(value) => (value, false),
        Err(panic) => {
            error!(correlation_id = %cid, stage, panic = %panic_message(&*panic), "Stage panicked, continuing degraded");
            (fallback(), true)
        }
    }
}

fn guarded_sync<T>(
    stage: &'static str,
    cid: &CorrelationId,
    f: impl FnOnce() -> T,
    fallback: impl FnOnce() -> T,
) -> (T, bool) {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => (value, false),
        Err(panic) => {
            error!(correlation_id = %cid, stage, panic = %panic_message(&*panic), "Stage panicked, continuing degraded");
            (fallback(), true)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts;
    use crate::test_helpers::*;
    use async_trait::async_trait;
    use pursuit_config::ContinuityConfig;
    use pursuit_core::blueprint::ToolKind;
    use pursuit_core::store::TurnRecord;
    use std::sync::atomic::{AtomicBool, Ordering};
    use pursuit_store::StoreHandles;

    const CARE: &str = "A member has income of $1500/month and two chronic conditions, do they qualify for care management?";

    struct Harness {
        orchestrator: Orchestrator,
        store: StoreHandles,
        retriever: Arc<StubRetriever>,
        provider: Arc<RuleProvider>,
        calls: ToolCalls,
    }

    fn harness(provider: RuleProvider, retriever: StubRetriever, tools: Vec<StubTool>) -> Harness {
        harness_with(provider, retriever, tools, |threads| threads)
    }

    fn harness_with(
        provider: RuleProvider,
        retriever: StubRetriever,
        tools: Vec<StubTool>,
        wrap_threads: impl FnOnce(Arc<dyn ThreadStore>) -> Arc<dyn ThreadStore>,
    ) -> Harness {
        let provider = Arc::new(provider);
        let retriever = Arc::new(retriever);
        let store = StoreHandles::in_memory();
        let (registry, calls) = stub_registry(tools);
        let orchestrator = Orchestrator::new(
            Planner::new(provider.clone(), "mock-model"),
            Resolver::new(retriever.clone(), Arc::new(registry), provider.clone(), "mock-model"),
            ContinuityTracker::new(&ContinuityConfig::default()),
            Integrator::new(provider.clone(), "mock-model"),
            wrap_threads(store.threads.clone()),
            store.turns.clone(),
            ProgressSink::new(store.progress.clone(), Arc::new(EventBus::default())),
        );
        Harness {
            orchestrator,
            store,
            retriever,
            provider,
            calls,
        }
    }

    impl Harness {
        async fn ask(&self, thread: &str, message: &str) -> TurnResponse {
            let cid = CorrelationId::new();
            self.store
                .turns
                .begin(TurnRecord::pending(cid.clone(), ThreadId::from(thread), message, None))
                .await
                .unwrap();
            self.orchestrator
                .run(TurnRequest {
                    correlation_id: cid,
                    thread_id: ThreadId::from(thread),
                    message: message.into(),
                    retry_of: None,
                })
                .await
        }

        async fn thread(&self, id: &str) -> Thread {
            self.store.threads.load(&ThreadId::from(id)).await.unwrap().unwrap()
        }
    }

    fn failing_search() -> Vec<StubTool> {
        vec![StubTool::failing("web_search")]
    }

    #[tokio::test]
    async fn patient_identifier_is_refused_before_retrieval() {
        let h = harness(echo_planner(), StubRetriever::abstaining(), failing_search());
        let response = h.ask("t1", "What is the status for MRN 98765?").await;

        assert!(h.retriever.queries().is_empty());
        assert_eq!(h.calls.count("web_search"), 0);
        assert_eq!(response.sub_answers[0].state, ResolutionState::Refused);
        assert_eq!(response.objective_status, Some(ObjectiveStatus::Blocked));
        assert!(response.message.contains("individual patient"));
        assert!(!response.degraded);

        let record = h.store.turns.get(&response.correlation_id).await.unwrap().unwrap();
        assert_eq!(record.status, TurnStatus::Completed);
        assert_eq!(record.response.unwrap().message, response.message);
    }

    #[tokio::test]
    async fn identifier_dropped_by_the_planner_is_still_refused() {
        let plan = plan_json_declaring(&[("What is the member's current status?", "web_search")]);
        let tools = vec![StubTool::ok("web_search", "1. Member portal - https://example.org")];
        let h = harness(rewriting_planner(plan), StubRetriever::abstaining(), tools);
        let response = h.ask("t1", "What is the status for MRN 98765?").await;

        assert_eq!(h.provider.calls_to(prompts::PLANNER_SYSTEM), 0);
        assert!(h.retriever.queries().is_empty());
        assert_eq!(h.calls.count("web_search"), 0);
        assert_eq!(response.sub_answers.len(), 1);
        assert_eq!(response.sub_answers[0].state, ResolutionState::Refused);
        assert_eq!(response.objective_status, Some(ObjectiveStatus::Blocked));

        let thread = h.thread("t1").await;
        assert_eq!(thread.turns[0].plan.sub_questions[0].kind, SubQuestionKind::PatientRestricted);
    }

    #[tokio::test]
    async fn url_dropped_by_the_planner_still_fetches_the_page() {
        let plan = plan_json_declaring(&[("Summarize Florida Medicaid eligibility from the agency site", "retrieval")]);
        let tools = vec![
            StubTool::ok("page_fetch", "Eligibility: household income under 138% FPL."),
            StubTool::failing("web_search"),
        ];
        let h = harness(rewriting_planner(plan), StubRetriever::abstaining(), tools);
        let response = h
            .ask("t1", "scrape https://ahca.myflorida.com/medicaid and summarize eligibility")
            .await;

        assert!(h.retriever.queries().is_empty());
        assert_eq!(h.calls.count("page_fetch"), 1);
        assert_eq!(h.calls.count("web_search"), 0);
        let fetched = h.calls.0["page_fetch"].lock().unwrap()[0].clone();
        assert_eq!(fetched["url"], "https://ahca.myflorida.com/medicaid");
        assert_eq!(response.sub_answers[0].strategy, Strategy::Tool(ToolKind::PageFetch));
        assert_eq!(response.sub_answers[0].state, ResolutionState::Answered);
    }

    #[tokio::test]
    async fn search_phrase_dropped_by_the_planner_still_searches() {
        let plan = plan_json_declaring(&[("What are the eligibility rules?", "reasoning")]);
        let tools = vec![StubTool::ok("web_search", "1. AHCA - https://ahca.myflorida.com")];
        let h = harness(rewriting_planner(plan), StubRetriever::abstaining(), tools);
        let response = h.ask("t1", "Search for Florida Medicaid eligibility requirements").await;

        assert!(h.retriever.queries().is_empty());
        assert_eq!(h.calls.count("web_search"), 1);
        assert_eq!(response.sub_answers[0].strategy, Strategy::Tool(ToolKind::WebSearch));
        assert_eq!(h.provider.calls_to(prompts::REASONING_SYSTEM), 0);
    }

    #[tokio::test]
    async fn search_phrase_uses_the_tool_only() {
        let tools = vec![StubTool::ok("web_search", "1. AHCA - https://ahca.myflorida.com")];
        let h = harness(echo_planner(), StubRetriever::abstaining(), tools);
        let response = h.ask("t1", "Search for Florida Medicaid eligibility requirements").await;

        assert!(h.retriever.queries().is_empty());
        assert_eq!(h.calls.count("web_search"), 1);
        assert_eq!(response.message, "Answer from the web [1].");
        assert_eq!(response.objective_status, Some(ObjectiveStatus::Solved));
    }

    #[tokio::test]
    async fn follow_up_is_merged_with_the_previous_question() {
        let retriever = StubRetriever::abstaining().answers(
            "care management",
            vec![candidate("cm-policy", 0.8, "Members with two chronic conditions qualify for care management.")],
        );
        let h = harness(echo_planner(), retriever, failing_search());

        let first = h.ask("t1", CARE).await;
        assert!(first.is_substantive());

        let second = h.ask("t1", "how about for United Healthcare").await;
        let queries = h.retriever.queries();
        assert_eq!(queries.len(), 2);
        let merged = &queries[1].0;
        assert!(merged.contains("$1500/month"), "{merged}");
        assert!(merged.contains("chronic conditions"), "{merged}");
        assert!(merged.contains("United Healthcare"), "{merged}");
        assert!(second.is_substantive());

        let thread = h.thread("t1").await;
        assert_eq!(thread.turns.len(), 2);
        assert_eq!(thread.turns[1].classification, Classification::FollowUpContinuation);
        assert_eq!(thread.objective.unwrap().status, ObjectiveStatus::Solved);
        assert!(thread.context.last_answer_substantive);
    }

    #[tokio::test]
    async fn cancellation_abandons_without_planning() {
        let h = harness(echo_planner(), StubRetriever::abstaining(), failing_search());
        h.ask("t1", "What is the Ohio CHIP asset limit?").await;
        let planner_calls = h.provider.calls_to(prompts::PLANNER_SYSTEM);

        let response = h.ask("t1", "never mind").await;
        assert_eq!(response.message, CANCEL_REPLY);
        assert_eq!(response.objective_status, Some(ObjectiveStatus::Abandoned));
        assert_eq!(h.provider.calls_to(prompts::PLANNER_SYSTEM), planner_calls);
        assert_eq!(h.thread("t1").await.objective.unwrap().status, ObjectiveStatus::Abandoned);
    }

    #[tokio::test]
    async fn retry_phrase_reruns_the_last_question() {
        let h = harness(echo_planner(), StubRetriever::abstaining(), failing_search());
        h.ask("t1", "What is the Ohio CHIP asset limit?").await;
        let before = h.thread("t1").await.objective.unwrap();

        h.ask("t1", "try again").await;
        let queries = h.retriever.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].0, queries[1].0);

        let thread = h.thread("t1").await;
        let after = thread.objective.unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.attempts, 1);
        assert_eq!(thread.turns[1].message, "What is the Ohio CHIP asset limit?");
    }

    /// Saves a competing cancellation just before the next save it sees.
    struct RacingThreads {
        inner: Arc<dyn ThreadStore>,
        armed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ThreadStore for RacingThreads {
        async fn load(&self, id: &ThreadId) -> Result<Option<Thread>, StoreError> {
            self.inner.load(id).await
        }

        async fn save(&self, thread: &Thread, expected_version: u64) -> Result<u64, StoreError> {
            if self.armed.swap(false, Ordering::SeqCst)
                && let Some(mut rival) = self.inner.load(&thread.id).await?
            {
                let mut cancel = rival.turns[0].clone();
                cancel.correlation_id = CorrelationId::from("rival");
                cancel.message = "never mind".into();
                rival.turns.push(cancel);
                if let Some(objective) = rival.objective.as_mut() {
                    objective.status = ObjectiveStatus::Abandoned;
                }
                let version = rival.version;
                self.inner.save(&rival, version).await?;
            }
            self.inner.save(thread, expected_version).await
        }
    }

    #[tokio::test]
    async fn conflicting_save_replays_on_the_latest_thread() {
        let armed = Arc::new(AtomicBool::new(false));
        let race = armed.clone();
        let h = harness_with(echo_planner(), StubRetriever::abstaining(), failing_search(), move |inner| {
            Arc::new(RacingThreads { inner, armed: race }) as Arc<dyn ThreadStore>
        });

        h.ask("t1", "What is the Ohio CHIP asset limit?").await;
        let first = h.thread("t1").await.objective.unwrap();
        assert_eq!(first.attempts, 1);

        armed.store(true, Ordering::SeqCst);
        let response = h.ask("t1", "What is the Ohio CHIP asset limit?").await;
        assert!(!response.degraded);

        let thread = h.thread("t1").await;
        assert_eq!(thread.turns.len(), 3);
        assert_eq!(thread.turns[1].message, "never mind");
        assert_eq!(thread.version, 3);

        // Replayed on the abandoned objective: a fresh one, not attempt two
        let objective = thread.objective.unwrap();
        assert_ne!(objective.id, first.id);
        assert_eq!(objective.attempts, 1);
        assert_eq!(response.objective_status, Some(objective.status));
    }

    #[tokio::test]
    async fn panicking_stage_degrades_but_publishes() {
        let provider = RuleProvider::new().rule(|req| {
            if system_of(req) == prompts::PLANNER_SYSTEM {
                panic!("planner exploded");
            }
            None
        });
        let retriever = StubRetriever::abstaining().answers(
            "dental",
            vec![candidate("fl-dental", 0.9, "Adult dental is covered for emergencies.")],
        );
        let h = harness(provider, retriever, failing_search());
        let response = h.ask("t1", "Does Florida Medicaid cover adult dental?").await;

        assert!(response.degraded);
        assert_eq!(response.message, "mock reply");
        let thread = h.thread("t1").await;
        assert!(thread.turns[0].plan.is_fallback());
        let record = h.store.turns.get(&response.correlation_id).await.unwrap().unwrap();
        assert_eq!(record.status, TurnStatus::Completed);
    }

    #[tokio::test]
    async fn empty_message_gets_a_reply_without_calls() {
        let h = harness(echo_planner(), StubRetriever::abstaining(), failing_search());
        let response = h.ask("t1", "   ").await;
        assert_eq!(response.message, EMPTY_REPLY);
        assert!(h.provider.calls().is_empty());
        assert!(h.retriever.queries().is_empty());
        assert_eq!(h.thread("t1").await.turns[0].plan.len(), 1);
    }

    #[tokio::test]
    async fn progress_log_ends_with_completed() {
        let h = harness(echo_planner(), StubRetriever::abstaining(), failing_search());
        let response = h.ask("t1", "What is the Ohio CHIP asset limit?").await;
        let events = h.store.progress.read_after(&response.correlation_id, 0).await.unwrap();

        let kinds: Vec<ProgressKind> = events.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&ProgressKind::Thinking));
        assert!(kinds.contains(&ProgressKind::SubQuestion));
        assert_eq!(kinds.last(), Some(&ProgressKind::Completed));
        assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));

        let payload: TurnResponse = serde_json::from_value(events.last().unwrap().payload.clone()).unwrap();
        assert_eq!(payload.message, response.message);
    }

    #[tokio::test]
    async fn unknown_ledger_entry_still_gets_a_terminal_event() {
        let h = harness(echo_planner(), StubRetriever::abstaining(), failing_search());
        let cid = CorrelationId::from("never-begun");
        h.orchestrator
            .run(TurnRequest {
                correlation_id: cid.clone(),
                thread_id: ThreadId::from("t1"),
                message: "What is the Ohio CHIP asset limit?".into(),
                retry_of: None,
            })
            .await;
        let events = h.store.progress.read_after(&cid, 0).await.unwrap();
        assert_eq!(events.last().map(|e| e.kind), Some(ProgressKind::Failed));
    }
}
