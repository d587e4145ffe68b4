//! The master objective: the cross-turn record of what the user is after.
//!
//! Mutated once per turn, after resolution, by the continuity tracker.
//! The attempt counter only resets on an explicit retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::answer::FailureReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    Active,
    Solved,
    Blocked,
    Abandoned,
    /// Attempt ceiling reached; no further user asks
    Incomplete,
}

impl ObjectiveStatus {
    /// Whether the objective is closed to further pursuit without a retry.
    pub fn is_closed(self) -> bool {
        !matches!(self, Self::Active | Self::Blocked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubObjectiveStatus {
    Pending,
    Answered,
    Partial,
    Failed,
    Blocked,
}

impl SubObjectiveStatus {
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Answered)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubObjective {
    /// Stable across turns ("so1", "so2", ...)
    pub id: String,
    pub text: String,
    pub status: SubObjectiveStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterObjective {
    pub id: String,
    pub status: ObjectiveStatus,
    pub summary: String,
    pub sub_objectives: Vec<SubObjective>,
    /// Consecutive unresolved turns
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_user_ask_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MasterObjective {
    pub fn new(summary: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: ObjectiveStatus::Active,
            summary: summary.into(),
            sub_objectives: Vec::new(),
            attempts: 0,
            last_user_ask_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sub-objectives not yet answered, in order.
    pub fn unresolved(&self) -> impl Iterator<Item = &SubObjective> {
        self.sub_objectives.iter().filter(|s| !s.status.is_resolved())
    }

    pub fn all_answered(&self) -> bool {
        !self.sub_objectives.is_empty() && self.sub_objectives.iter().all(|s| s.status.is_resolved())
    }

    pub fn get(&self, id: &str) -> Option<&SubObjective> {
        self.sub_objectives.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SubObjective> {
        self.sub_objectives.iter_mut().find(|s| s.id == id)
    }

    /// Next free sub-objective id.
    pub fn next_sub_id(&self) -> String {
        let max = self
            .sub_objectives
            .iter()
            .filter_map(|s| s.id.strip_prefix("so").and_then(|n| n.parse::<u32>().ok()))
            .max()
            .unwrap_or(0);
        format!("so{}", max + 1)
    }
}
