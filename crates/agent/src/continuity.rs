//! Continuity Tracker: the per-thread master objective.
//!
//! Runs once per turn, after every sub-question has resolved. It never
//! sees a half-finished turn.
//!
//! - no open objective, or an unrelated new question after a closed one:
//!   a fresh objective
//! - anything else: merge into the open objective, carrying unresolved
//!   sub-objectives forward
//! - cancellation abandons; retry resets `attempts` but keeps the id
//! - `attempts` counts turns that pursued an open sub-objective and left it
//!   open; reaching the ceiling closes the objective as incomplete and
//!   silences further asks

use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, info};

use pursuit_config::ContinuityConfig;
use pursuit_core::answer::{FailureReason, ResolutionState, SubQuestionResolution};
use pursuit_core::objective::{MasterObjective, ObjectiveStatus, SubObjective, SubObjectiveStatus};
use pursuit_core::plan::{Classification, Plan};

use crate::cues;

/// Overlap above which a sub-question pursues an existing sub-objective.
const SAME_ITEM_OVERLAP: f64 = 0.6;

/// What the user asked for, apart from the question itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Ask,
    Retry,
    Cancel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContinuityUpdate {
    pub objective: Option<MasterObjective>,
    /// Reason-coded requests for help, one line per open sub-objective
    pub user_ask: Option<String>,
    /// Set when the objective is closed as incomplete
    pub closure: Option<String>,
}

pub struct ContinuityTracker {
    ceiling: u32,
    cancellation_phrases: Vec<String>,
    retry_phrases: Vec<String>,
    closure_message: String,
}

impl ContinuityTracker {
    pub fn new(config: &ContinuityConfig) -> Self {
        Self {
            ceiling: config.attempt_ceiling.max(1),
            cancellation_phrases: config.cancellation_phrases.clone(),
            retry_phrases: config.retry_phrases.clone(),
            closure_message: config.closure_message.clone(),
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn intent(&self, message: &str) -> Intent {
        if cues::matches_phrase(message, &self.cancellation_phrases) {
            Intent::Cancel
        } else if cues::matches_phrase(message, &self.retry_phrases) {
            Intent::Retry
        } else {
            Intent::Ask
        }
    }

    /// Fold one turn's resolutions into the thread's objective.
    pub fn update(
        &self,
        current: Option<MasterObjective>,
        intent: Intent,
        classification: Classification,
        message: &str,
        plan: &Plan,
        resolutions: &[SubQuestionResolution],
    ) -> ContinuityUpdate {
        let now = Utc::now();

        if intent == Intent::Cancel {
            let objective = current.map(|mut objective| {
                info!(objective = %objective.id, attempts = objective.attempts, "Objective abandoned");
                objective.status = ObjectiveStatus::Abandoned;
                objective.updated_at = now;
                objective
            });
            return ContinuityUpdate {
                objective,
                user_ask: None,
                closure: None,
            };
        }

        let mut objective = match current {
            Some(mut objective) if intent == Intent::Retry => {
                info!(objective = %objective.id, "Objective retried, attempts reset");
                objective.attempts = 0;
                objective.status = ObjectiveStatus::Active;
                for sub in objective.sub_objectives.iter_mut().filter(|s| !s.status.is_resolved()) {
                    sub.status = SubObjectiveStatus::Pending;
                }
                objective
            }
            Some(objective) if self.continues(&objective, classification, plan) => objective,
            previous => {
                if let Some(previous) = previous {
                    debug!(previous = %previous.id, status = ?previous.status, "Starting a new objective");
                }
                MasterObjective::new(message.trim())
            }
        };

        if objective.status == ObjectiveStatus::Solved {
            objective.status = ObjectiveStatus::Active;
        }
        let was_incomplete = objective.status == ObjectiveStatus::Incomplete;

        let touched = merge(&mut objective, plan, resolutions);
        objective.updated_at = now;

        let answered_now = resolutions.iter().any(|r| r.is_answered());
        let mut user_ask = None;
        let mut closure = None;

        if was_incomplete {
            // Exhausted: no more attempts counted, no more asks
            if !answered_now {
                closure = Some(self.closure_message.clone());
            }
        } else if objective.all_answered() {
            objective.status = ObjectiveStatus::Solved;
        } else if !resolutions.is_empty() {
            // Only a turn that pursued an open item and left it open counts
            let attempted = touched
                .iter()
                .any(|id| objective.get(id).is_some_and(|s| !s.status.is_resolved()));
            if attempted {
                objective.attempts += 1;
            }
            if attempted && objective.attempts >= self.ceiling {
                info!(objective = %objective.id, attempts = objective.attempts, "Attempt ceiling reached");
                objective.status = ObjectiveStatus::Incomplete;
                closure = Some(self.closure_message.clone());
            } else {
                let blocked_only = objective
                    .unresolved()
                    .all(|s| s.status == SubObjectiveStatus::Blocked);
                objective.status = if blocked_only {
                    ObjectiveStatus::Blocked
                } else {
                    ObjectiveStatus::Active
                };
                user_ask = asks(&objective, &touched);
            }
        }

        if user_ask.is_some() {
            objective.last_user_ask_at = Some(now);
        }

        info!(
            objective = %objective.id,
            status = ?objective.status,
            attempts = objective.attempts,
            open = objective.unresolved().count(),
            "Objective updated"
        );

        ContinuityUpdate {
            objective: Some(objective),
            user_ask,
            closure,
        }
    }

    /// Whether this turn pursues `objective` rather than starting over.
    fn continues(&self, objective: &MasterObjective, classification: Classification, plan: &Plan) -> bool {
        let relates = plan
            .sub_questions
            .iter()
            .any(|sq| sq.objective_ref.is_some() || find_match(objective, &sq.text, true).is_some());

        match objective.status {
            ObjectiveStatus::Abandoned => false,
            ObjectiveStatus::Solved | ObjectiveStatus::Incomplete => classification.is_followup() || relates,
            ObjectiveStatus::Blocked => classification.is_followup() || relates,
            ObjectiveStatus::Active => true,
        }
    }
}

/// Apply each resolution to its sub-objective. Returns the ids touched.
fn merge(objective: &mut MasterObjective, plan: &Plan, resolutions: &[SubQuestionResolution]) -> HashSet<String> {
    let mut touched = HashSet::new();

    for resolution in resolutions {
        let objective_ref = plan
            .sub_questions
            .iter()
            .find(|sq| sq.id == resolution.sub_question_id)
            .and_then(|sq| sq.objective_ref.clone())
            .filter(|id| objective.get(id).is_some());

        let id = match objective_ref.or_else(|| find_match(objective, &resolution.question, false)) {
            Some(id) => id,
            None => {
                let id = objective.next_sub_id();
                objective.sub_objectives.push(SubObjective {
                    id: id.clone(),
                    text: resolution.question.clone(),
                    status: SubObjectiveStatus::Pending,
                    last_failure: None,
                });
                id
            }
        };

        if let Some(sub) = objective.get_mut(&id) {
            let (status, failure) = sub_status(resolution);
            // An answered item stays answered
            if sub.status.is_resolved() && !status.is_resolved() {
                continue;
            }
            sub.status = status;
            sub.last_failure = failure;
            touched.insert(id);
        }
    }
    touched
}

/// The sub-objective `text` pursues: same normalized text first, then a
/// close overlap with an unresolved one.
fn find_match(objective: &MasterObjective, text: &str, unresolved_only: bool) -> Option<String> {
    let normalized = cues::normalize(text);
    objective
        .sub_objectives
        .iter()
        .filter(|s| !unresolved_only || !s.status.is_resolved())
        .find(|s| cues::normalize(&s.text) == normalized)
        .or_else(|| {
            objective
                .unresolved()
                .map(|s| (s, cues::overlap(&s.text, text)))
                .filter(|(_, score)| *score >= SAME_ITEM_OVERLAP)
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(s, _)| s)
        })
        .map(|s| s.id.clone())
}

fn sub_status(resolution: &SubQuestionResolution) -> (SubObjectiveStatus, Option<FailureReason>) {
    match resolution.state {
        ResolutionState::Answered if resolution.answer.is_some() => (SubObjectiveStatus::Answered, None),
        // Reasoning standing in for missing evidence only partly answers
        ResolutionState::ReasoningOnly if resolution.fallback_used => {
            (SubObjectiveStatus::Partial, Some(FailureReason::NoEvidence))
        }
        ResolutionState::ReasoningOnly if resolution.answer.is_some() => (SubObjectiveStatus::Answered, None),
        ResolutionState::Refused => (SubObjectiveStatus::Blocked, Some(FailureReason::PatientIdentifier)),
        _ => (
            SubObjectiveStatus::Failed,
            Some(resolution.failure.unwrap_or(FailureReason::NoEvidence)),
        ),
    }
}

/// One ask per open sub-objective. Blocked items are only raised on the
/// turn that refused them.
fn asks(objective: &MasterObjective, touched: &HashSet<String>) -> Option<String> {
    let lines: Vec<String> = objective
        .unresolved()
        .filter(|s| s.status != SubObjectiveStatus::Blocked || touched.contains(&s.id))
        .filter_map(|s| s.last_failure.map(|reason| reason.user_ask(&s.text)))
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}
