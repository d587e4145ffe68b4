//! Persistence traits for the state this engine owns.
//!
//! Three tables: versioned thread documents, a turn ledger keyed by
//! correlation id, and the append-only progress log. Backends live in
//! `pursuit-store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::answer::TurnResponse;
use crate::error::StoreError;
use crate::event::{ProgressEvent, ProgressKind};
use crate::thread::{CorrelationId, Thread, ThreadId, TurnStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: Rating,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// One submitted request and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub correlation_id: CorrelationId,
    pub thread_id: ThreadId,
    pub message: String,
    /// Correlation id of the turn this request re-runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<CorrelationId>,
    pub status: TurnStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<TurnResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TurnRecord {
    pub fn pending(
        correlation_id: CorrelationId,
        thread_id: ThreadId,
        message: impl Into<String>,
        retry_of: Option<CorrelationId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            correlation_id,
            thread_id,
            message: message.into(),
            retry_of,
            status: TurnStatus::Pending,
            response: None,
            feedback: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of registering a correlation id.
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// First sighting; the caller owns processing
    Created,
    /// Already known; nothing new is processed
    Existing(TurnRecord),
}

/// Versioned thread documents with optimistic concurrency.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn load(&self, id: &ThreadId) -> std::result::Result<Option<Thread>, StoreError>;

    /// Persist `thread` if the stored version equals `expected_version`
    /// (0 for a thread never saved). Returns the new version.
    async fn save(&self, thread: &Thread, expected_version: u64) -> std::result::Result<u64, StoreError>;
}

/// Correlation-id keyed turn records. `begin` is the idempotence gate.
#[async_trait]
pub trait TurnLedger: Send + Sync {
    async fn begin(&self, record: TurnRecord) -> std::result::Result<BeginOutcome, StoreError>;

    async fn finish(
        &self,
        id: &CorrelationId,
        status: TurnStatus,
        response: &TurnResponse,
    ) -> std::result::Result<(), StoreError>;

    async fn get(&self, id: &CorrelationId) -> std::result::Result<Option<TurnRecord>, StoreError>;

    async fn record_feedback(&self, id: &CorrelationId, feedback: Feedback) -> std::result::Result<(), StoreError>;
}

/// Append-only progress events keyed by correlation id + sequence.
#[async_trait]
pub trait ProgressLog: Send + Sync {
    /// Append an event; the log assigns the next sequence number.
    async fn append(
        &self,
        id: &CorrelationId,
        kind: ProgressKind,
        payload: serde_json::Value,
    ) -> std::result::Result<ProgressEvent, StoreError>;

    /// Events with `seq > after`, in sequence order.
    async fn read_after(&self, id: &CorrelationId, after: u64) -> std::result::Result<Vec<ProgressEvent>, StoreError>;
}
