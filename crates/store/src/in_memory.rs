//! In-memory backend: useful for tests and ephemeral deployments.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use pursuit_core::answer::TurnResponse;
use pursuit_core::error::StoreError;
use pursuit_core::event::{ProgressEvent, ProgressKind};
use pursuit_core::store::{BeginOutcome, Feedback, ProgressLog, ThreadStore, TurnLedger, TurnRecord};
use pursuit_core::thread::{CorrelationId, Thread, ThreadId, TurnStatus};

/// Threads, turn records and progress events held in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    threads: Arc<RwLock<HashMap<ThreadId, Thread>>>,
    turns: Arc<RwLock<HashMap<CorrelationId, TurnRecord>>>,
    events: Arc<RwLock<HashMap<CorrelationId, Vec<ProgressEvent>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for InMemoryStore {
    async fn load(&self, id: &ThreadId) -> Result<Option<Thread>, StoreError> {
        Ok(self.threads.read().await.get(id).cloned())
    }

    async fn save(&self, thread: &Thread, expected_version: u64) -> Result<u64, StoreError> {
        let mut threads = self.threads.write().await;
        let found = threads.get(&thread.id).map(|t| t.version).unwrap_or(0);
        if found != expected_version {
            return Err(StoreError::Conflict {
                thread_id: thread.id.to_string(),
                expected: expected_version,
                found,
            });
        }

        let mut stored = thread.clone();
        stored.version = found + 1;
        stored.updated_at = Utc::now();
        threads.insert(stored.id.clone(), stored);
        Ok(found + 1)
    }
}

#[async_trait]
impl TurnLedger for InMemoryStore {
    async fn begin(&self, record: TurnRecord) -> Result<BeginOutcome, StoreError> {
        let mut turns = self.turns.write().await;
        if let Some(existing) = turns.get(&record.correlation_id) {
            return Ok(BeginOutcome::Existing(existing.clone()));
        }
        turns.insert(record.correlation_id.clone(), record);
        Ok(BeginOutcome::Created)
    }

    async fn finish(&self, id: &CorrelationId, status: TurnStatus, response: &TurnResponse) -> Result<(), StoreError> {
        let mut turns = self.turns.write().await;
        let record = turns
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("turn {id}")))?;
        record.status = status;
        record.response = Some(response.clone());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, id: &CorrelationId) -> Result<Option<TurnRecord>, StoreError> {
        Ok(self.turns.read().await.get(id).cloned())
    }

    async fn record_feedback(&self, id: &CorrelationId, feedback: Feedback) -> Result<(), StoreError> {
        let mut turns = self.turns.write().await;
        let record = turns
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("turn {id}")))?;
        record.feedback = Some(feedback);
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ProgressLog for InMemoryStore {
    async fn append(
        &self,
        id: &CorrelationId,
        kind: ProgressKind,
        payload: serde_json::Value,
    ) -> Result<ProgressEvent, StoreError> {
        let mut events = self.events.write().await;
        let log = events.entry(id.clone()).or_default();
        let event = ProgressEvent {
            correlation_id: id.clone(),
            seq: log.last().map(|e| e.seq).unwrap_or(0) + 1,
            kind,
            payload,
            timestamp: Utc::now(),
        };
        log.push(event.clone());
        Ok(event)
    }

    async fn read_after(&self, id: &CorrelationId, after: u64) -> Result<Vec<ProgressEvent>, StoreError> {
        Ok(self
            .events
            .read()
            .await
            .get(id)
            .map(|log| log.iter().filter(|e| e.seq > after).cloned().collect())
            .unwrap_or_default())
    }
}
