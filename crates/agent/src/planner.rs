//! Planner/Classifier: how a message relates to the previous turn, and its
//! decomposition into sub-questions.
//!
//! Classification is deterministic and defaults to `NewQuestion`.
//! Decomposition asks the model for schema-shaped JSON and parses the reply
//! into a [`PlanParse`]; anything unusable becomes the minimal one
//! sub-question plan. [`Planner::plan`] never returns an empty plan and
//! never fails.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use pursuit_core::objective::MasterObjective;
use pursuit_core::plan::{CapabilityNeed, Classification, FallbackRule, Plan, SubQuestion, SubQuestionKind};
use pursuit_core::provider::{Provider, ProviderRequest};
use pursuit_core::thread::ContinuityContext;

use crate::cues;
use crate::jurisdiction::Jurisdiction;
use crate::prompts;

/// Word count at or under which a reply to an ask counts as a slot fill.
const SLOT_FILL_MAX_WORDS: usize = 6;

/// Outcome of parsing a decomposition reply.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanParse {
    Parsed(Plan),
    Fallback(String),
}

impl PlanParse {
    /// The plan to use: the parsed one, or the minimal plan over `message`.
    pub fn into_plan(self, message: &str) -> Plan {
        match self {
            Self::Parsed(plan) => plan,
            Self::Fallback(reason) => Plan::minimal(message, reason),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    sub_questions: Vec<RawSubQuestion>,
}

#[derive(Debug, Deserialize)]
struct RawSubQuestion {
    #[serde(alias = "question")]
    text: String,
    #[serde(default)]
    kind: SubQuestionKind,
    #[serde(default)]
    capability: CapabilityNeed,
    #[serde(default)]
    fallback: FallbackRule,
    #[serde(default)]
    objective_ref: Option<String>,
}

/// Cut a JSON object out of a reply that may wrap it in prose or fences.
fn json_body(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

/// Parse a decomposition reply. `open_ids` are the sub-objective ids the
/// model may reference; other references are dropped.
pub fn parse_plan(reply: &str, max_sub_questions: usize, open_ids: &[String]) -> PlanParse {
    let Some(body) = json_body(reply) else {
        return PlanParse::Fallback("decomposition reply held no JSON object".into());
    };
    let raw: RawPlan = match serde_json::from_str(body) {
        Ok(raw) => raw,
        Err(e) => return PlanParse::Fallback(format!("decomposition did not match the schema: {e}")),
    };

    let sub_questions: Vec<SubQuestion> = raw
        .sub_questions
        .into_iter()
        .filter(|sq| !sq.text.trim().is_empty())
        .take(max_sub_questions.max(1))
        .enumerate()
        .map(|(i, sq)| {
            let mut question = SubQuestion::new(format!("sq{}", i + 1), sq.text.trim())
                .with_kind(sq.kind)
                .with_capability(sq.capability)
                .with_fallback(sq.fallback);
            question.objective_ref = sq.objective_ref.filter(|id| open_ids.contains(id));
            question
        })
        .collect();

    if sub_questions.is_empty() {
        return PlanParse::Fallback("model returned zero sub-questions".into());
    }
    PlanParse::Parsed(Plan::from_model(sub_questions, ""))
}

/// Classify `message` against the previous turn's context.
///
/// `has_previous_turn` is false for the first message of a thread, which is
/// always a new question.
pub fn classify(message: &str, context: &ContinuityContext, has_previous_turn: bool) -> Classification {
    if !has_previous_turn || message.trim().is_empty() {
        return Classification::NewQuestion;
    }

    let word_count = cues::words(message).len();
    if context.awaiting_user_input && word_count <= SLOT_FILL_MAX_WORDS && !message.contains('?') {
        return Classification::SlotFill;
    }

    if context.last_answer_substantive {
        let anaphoric = cues::is_anaphoric(message);
        let bare_jurisdiction = cues::is_underspecified(message) && !Jurisdiction::extract(message).is_empty();
        if anaphoric || bare_jurisdiction {
            return Classification::FollowUpContinuation;
        }
    }

    Classification::NewQuestion
}

pub struct Planner {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_sub_questions: usize,
    timeout: Duration,
}

impl Planner {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            max_tokens: 1024,
            max_sub_questions: 5,
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_max_sub_questions(mut self, max: usize) -> Self {
        self.max_sub_questions = max.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Decompose `message`. Slot fills re-pursue the objective's open items
    /// with the supplied detail instead of asking the model.
    pub async fn plan(
        &self,
        message: &str,
        classification: Classification,
        context: &ContinuityContext,
        objective: Option<&MasterObjective>,
    ) -> Plan {
        if message.trim().is_empty() {
            return Plan::minimal(message, "empty message");
        }

        let open: Vec<(String, String)> = objective
            .filter(|o| !o.status.is_closed())
            .map(|o| o.unresolved().map(|s| (s.id.clone(), s.text.clone())).collect())
            .unwrap_or_default();

        if classification == Classification::SlotFill && !open.is_empty() {
            let sub_questions = open
                .iter()
                .take(self.max_sub_questions)
                .enumerate()
                .map(|(i, (id, text))| {
                    let mut sq = SubQuestion::new(format!("sq{}", i + 1), format!("{text} {}", message.trim()));
                    sq.objective_ref = Some(id.clone());
                    sq
                })
                .collect();
            info!(open = open.len(), "Slot fill re-pursues open items");
            return Plan::from_model(sub_questions, message);
        }

        let previous = classification
            .is_followup()
            .then_some(context.last_refined_query.as_deref())
            .flatten();
        let request = ProviderRequest::prompt(
            &self.model,
            prompts::PLANNER_SYSTEM,
            prompts::planner_input(message, previous, &open, self.max_sub_questions),
        )
        .with_schema(prompts::plan_schema(self.max_sub_questions))
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let reply = match tokio::time::timeout(self.timeout, self.provider.complete(request)).await {
            Ok(Ok(response)) => response.message.content,
            Ok(Err(e)) => {
                warn!(error = %e, "Decomposition call failed, using minimal plan");
                return Plan::minimal(message, format!("decomposition call failed: {e}"));
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Decomposition timed out, using minimal plan");
                return Plan::minimal(message, "decomposition timed out");
            }
        };

        let open_ids: Vec<String> = open.into_iter().map(|(id, _)| id).collect();
        let parsed = parse_plan(&reply, self.max_sub_questions, &open_ids);
        if let PlanParse::Fallback(reason) = &parsed {
            warn!(reason = %reason, "Decomposition unusable, using minimal plan");
        }
        let plan = parsed.into_plan(message);
        debug!(sub_questions = plan.len(), fallback = plan.is_fallback(), "Plan ready");
        plan
    }
}
