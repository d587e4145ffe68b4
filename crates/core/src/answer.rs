//! Answers, per-sub-question resolutions, and the published turn response.

use serde::{Deserialize, Serialize};

use crate::blueprint::Strategy;
use crate::objective::ObjectiveStatus;
use crate::thread::{CorrelationId, ThreadId};

/// A pointer to the evidence an answer rests on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    /// Parent unit id or tool source identifier
    pub source_id: String,
    /// Human-readable provenance (document title, section, page)
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    /// Calibrated confidence in [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// Resolution state of one sub-question within a turn.
///
/// `Pending -> InProgress -> {Answered | NoEvidence | ToolFailed | ReasoningOnly}`;
/// `Refused` is reached directly from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    Pending,
    InProgress,
    Answered,
    NoEvidence,
    ToolFailed,
    /// Answered from model reasoning alone, without grounded evidence
    ReasoningOnly,
    Refused,
}

impl ResolutionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::InProgress)
    }

    /// Whether the user got a usable answer for this sub-question.
    pub fn is_answered(self) -> bool {
        matches!(self, Self::Answered | Self::ReasoningOnly)
    }
}

/// The user-facing failure taxonomy. Every variant renders a specific ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Decomposition or classification could not be parsed
    MalformedInput,
    /// Retrieval abstained and no fallback found an answer
    NoEvidence,
    /// An external tool timed out or errored
    ToolUnavailable,
    /// Both retrieval channels were down
    RetrievalUnavailable,
    /// Attempt ceiling reached
    ObjectiveExhausted,
    /// The sub-question names a specific patient or member
    PatientIdentifier,
    /// The reasoning strategy timed out or returned nothing
    ReasoningUnavailable,
}

impl FailureReason {
    pub fn code(self) -> &'static str {
        match self {
            Self::MalformedInput => "malformed_input",
            Self::NoEvidence => "no_evidence",
            Self::ToolUnavailable => "tool_unavailable",
            Self::RetrievalUnavailable => "retrieval_unavailable",
            Self::ObjectiveExhausted => "objective_exhausted",
            Self::PatientIdentifier => "patient_identifier",
            Self::ReasoningUnavailable => "reasoning_unavailable",
        }
    }

    /// What could not be resolved plus what the user can do about it.
    pub fn user_ask(self, subject: &str) -> String {
        match self {
            Self::MalformedInput => format!(
                "I couldn't break down \"{subject}\" into parts I can look up. \
                 Could you restate it as one specific question?"
            ),
            Self::NoEvidence => format!(
                "I couldn't find published guidance on \"{subject}\". \
                 Can you tell me the state or health plan this applies to, \
                 or share a link to the policy document?"
            ),
            Self::ToolUnavailable => format!(
                "The external lookup for \"{subject}\" didn't respond. \
                 Can you paste the relevant text or link directly?"
            ),
            Self::RetrievalUnavailable => format!(
                "The document search service is unavailable, so \"{subject}\" \
                 could not be checked against the corpus. Please try again shortly."
            ),
            Self::ObjectiveExhausted => format!(
                "I've made several attempts at \"{subject}\" without finding an answer. \
                 Say \"retry\" to start over on it."
            ),
            Self::PatientIdentifier => format!(
                "I can't look up information about an individual patient or member (\"{subject}\"). \
                 Please ask about the policy or program in general terms, without names, IDs or dates of birth."
            ),
            Self::ReasoningUnavailable => format!(
                "I couldn't compose an answer for \"{subject}\" right now. \
                 Can you narrow it to a specific program or requirement?"
            ),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// The outcome of resolving one blueprint entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestionResolution {
    pub sub_question_id: String,
    pub question: String,
    /// The strategy that produced the final state (after any fallback)
    pub strategy: Strategy,
    pub state: ResolutionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Answer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Whether the declared fallback was executed
    #[serde(default)]
    pub fallback_used: bool,
    /// Retrieval ran with only one channel available
    #[serde(default)]
    pub partial_channel: bool,
}

impl SubQuestionResolution {
    pub fn answered(id: &str, question: &str, strategy: Strategy, state: ResolutionState, answer: Answer) -> Self {
        Self {
            sub_question_id: id.to_string(),
            question: question.to_string(),
            strategy,
            state,
            answer: Some(answer),
            failure: None,
            fallback_used: false,
            partial_channel: false,
        }
    }

    pub fn failed(id: &str, question: &str, strategy: Strategy, state: ResolutionState, failure: FailureReason) -> Self {
        Self {
            sub_question_id: id.to_string(),
            question: question.to_string(),
            strategy,
            state,
            answer: None,
            failure: Some(failure),
            fallback_used: false,
            partial_channel: false,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.state.is_answered() && self.answer.is_some()
    }
}

/// The structured payload published for every turn, including degraded ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub correlation_id: CorrelationId,
    pub thread_id: ThreadId,
    /// The integrated answer text shown to the user
    pub message: String,
    #[serde(default)]
    pub sub_answers: Vec<SubQuestionResolution>,
    #[serde(default)]
    pub sources: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective_status: Option<ObjectiveStatus>,
    /// The specific request for user help, if any sub-objective is unresolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ask: Option<String>,
    /// Some stage fell back to a degraded result
    #[serde(default)]
    pub degraded: bool,
}

impl TurnResponse {
    /// A bare response carrying only a message; used when publishing best-effort state.
    pub fn minimal(correlation_id: CorrelationId, thread_id: ThreadId, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            thread_id,
            message: message.into(),
            sub_answers: Vec::new(),
            sources: Vec::new(),
            objective_status: None,
            user_ask: None,
            degraded: true,
        }
    }

    /// Whether the answer text carries substance (at least one sub-question answered).
    pub fn is_substantive(&self) -> bool {
        self.sub_answers.iter().any(|s| s.is_answered())
    }
}
