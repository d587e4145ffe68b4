//! Threads and turns: the persistent conversation record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::answer::TurnResponse;
use crate::objective::MasterObjective;
use crate::plan::{Classification, Plan};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a conversation thread.
    ThreadId
);

string_id!(
    /// Unique identifier for one submitted request (one turn).
    CorrelationId
);

/// Status of a turn within its thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Pending,
    Completed,
    Failed,
}

impl TurnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One request/response exchange. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub correlation_id: CorrelationId,

    /// Raw user message
    pub message: String,

    pub classification: Classification,

    pub plan: Plan,

    pub response: TurnResponse,

    pub status: TurnStatus,

    pub created_at: DateTime<Utc>,
}

/// Prior-turn context carried into the next turn's planner and router.
///
/// Passed explicitly as a value; nothing reads it from ambient state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuityContext {
    /// The last retrieval-ready query text the router produced
    #[serde(default)]
    pub last_refined_query: Option<String>,

    /// Last merged jurisdiction/filter summary (e.g. "Florida Medicaid")
    #[serde(default)]
    pub jurisdiction_summary: Option<String>,

    /// Set by the classifier for the current turn
    #[serde(default)]
    pub is_followup: bool,

    /// Citations of the previous turn's answer
    #[serde(default)]
    pub last_sources: Vec<String>,

    /// Whether the previous turn produced a substantive (non-refusal) answer
    #[serde(default)]
    pub last_answer_substantive: bool,

    /// Whether the previous turn ended by asking the user for something
    #[serde(default)]
    pub awaiting_user_input: bool,
}

/// A persistent conversation: the versioned document keyed by thread id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,

    /// Ordered turn history
    #[serde(default)]
    pub turns: Vec<Turn>,

    /// The cross-turn objective, if any has been opened
    #[serde(default)]
    pub objective: Option<MasterObjective>,

    #[serde(default)]
    pub context: ContinuityContext,

    /// Optimistic concurrency version, bumped by the store on every save
    #[serde(default)]
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(id: ThreadId) -> Self {
        let now = Utc::now();
        Self {
            id,
            turns: Vec::new(),
            objective: None,
            context: ContinuityContext::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn find_turn(&self, correlation_id: &CorrelationId) -> Option<&Turn> {
        self.turns.iter().find(|t| &t.correlation_id == correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_transparently() {
        let id = ThreadId::from("t-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""t-42""#);
        let back: ThreadId = serde_json::from_str(r#""t-42""#).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn new_thread_is_empty() {
        let thread = Thread::new(ThreadId::from("t"));
        assert!(thread.turns.is_empty());
        assert!(thread.objective.is_none());
        assert_eq!(thread.version, 0);
        assert!(!thread.context.is_followup);
    }

    #[test]
    fn thread_document_tolerates_missing_fields() {
        let json = r#"{"id":"t","created_at":"2025-01-01T00:00:00Z","updated_at":"2025-01-01T00:00:00Z"}"#;
        let thread: Thread = serde_json::from_str(json).unwrap();
        assert!(thread.turns.is_empty());
        assert_eq!(thread.context, ContinuityContext::default());
    }
}
