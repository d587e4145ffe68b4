//! Classification and decomposition output of the planner stage.

use serde::{Deserialize, Serialize};

/// How a raw message relates to the thread's previous turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Self-contained question; the default on any ambiguity
    #[default]
    NewQuestion,
    /// A short reply supplying what the previous turn asked for
    SlotFill,
    /// Depends on anaphoric reference to the previous turn
    FollowUpContinuation,
}

impl Classification {
    pub fn is_followup(self) -> bool {
        !matches!(self, Self::NewQuestion)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubQuestionKind {
    #[default]
    Generic,
    /// Mentions identifiers of a specific patient or member
    PatientRestricted,
    /// Explicitly needs an external tool
    Tool,
}

/// What the planner declared a sub-question needs in order to be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityNeed {
    #[default]
    Retrieval,
    WebSearch,
    PageFetch,
    Reasoning,
}

/// What to try, at most once, when the chosen strategy yields nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackRule {
    None,
    /// On no evidence, retry via external search
    #[default]
    TryTool,
    /// On no evidence or tool failure, answer from model reasoning
    TryReasoning,
}

/// One atomic unit of a decomposed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestion {
    /// Stable within a plan ("sq1", "sq2", ...)
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub kind: SubQuestionKind,
    #[serde(default)]
    pub capability: CapabilityNeed,
    #[serde(default)]
    pub fallback: FallbackRule,
    /// Set when this sub-question re-pursues a carried-forward sub-objective
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective_ref: Option<String>,
}

impl SubQuestion {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            kind: SubQuestionKind::default(),
            capability: CapabilityNeed::default(),
            fallback: FallbackRule::default(),
            objective_ref: None,
        }
    }

    pub fn with_capability(mut self, capability: CapabilityNeed) -> Self {
        self.capability = capability;
        self
    }

    pub fn with_kind(mut self, kind: SubQuestionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackRule) -> Self {
        self.fallback = fallback;
        self
    }
}

/// Where a plan came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanSource {
    /// Parsed from a schema-valid model decomposition
    Model,
    /// The minimal single-sub-question plan, with the reason it was used
    Fallback { reason: String },
}

/// The decomposition of one turn's message. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub sub_questions: Vec<SubQuestion>,
    pub source: PlanSource,
}

impl Plan {
    /// A model plan. An empty list degrades to the minimal plan.
    pub fn from_model(sub_questions: Vec<SubQuestion>, raw_message: &str) -> Self {
        if sub_questions.is_empty() {
            return Self::minimal(raw_message, "model returned zero sub-questions");
        }
        Self {
            sub_questions,
            source: PlanSource::Model,
        }
    }

    /// A single sub-question whose text is the raw message.
    pub fn minimal(raw_message: &str, reason: impl Into<String>) -> Self {
        Self {
            sub_questions: vec![SubQuestion::new("sq1", raw_message)],
            source: PlanSource::Fallback {
                reason: reason.into(),
            },
        }
    }

    /// The message names a specific patient: one restricted sub-question,
    /// built without asking the model.
    pub fn restricted(raw_message: &str) -> Self {
        let sq = SubQuestion::new("sq1", raw_message)
            .with_kind(SubQuestionKind::PatientRestricted)
            .with_fallback(FallbackRule::None);
        Self {
            sub_questions: vec![sq],
            source: PlanSource::Fallback {
                reason: "patient identifier in message".into(),
            },
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, PlanSource::Fallback { .. })
    }

    pub fn len(&self) -> usize {
        self.sub_questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_questions.is_empty()
    }
}
