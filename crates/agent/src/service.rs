//! The request/response boundary: `submit`, `poll`, `stream`.
//!
//! `submit` registers the correlation id in the turn ledger (the
//! idempotence gate) and hands the turn to a bounded worker pool. Turns on
//! the same thread run one at a time; different threads run in parallel.
//! `stream` reads the progress log from a sequence number, so a reader
//! that disconnects can resume, or fall back to `poll`, without losing the
//! outcome.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use pursuit_config::ServiceConfig;
use pursuit_core::answer::TurnResponse;
use pursuit_core::error::StoreError;
use pursuit_core::event::{EventBus, ProgressEvent, ProgressKind};
use pursuit_core::store::{BeginOutcome, Feedback, ProgressLog, Rating, ThreadStore, TurnLedger, TurnRecord};
use pursuit_core::thread::{CorrelationId, Thread, ThreadId, TurnStatus};

use crate::orchestrator::{Orchestrator, ProgressSink, TurnRequest};

pub const MAX_MESSAGE_CHARS: usize = 8_000;
pub const MAX_COMMENT_CHARS: usize = 500;

const FAILED_REPLY: &str = "Something went wrong while answering. Please send the question again.";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub retry_of: Option<String>,
}

impl SubmitRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn on_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn retrying(mut self, id: impl Into<String>) -> Self {
        self.retry_of = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub correlation_id: CorrelationId,
    pub thread_id: ThreadId,
    pub status: TurnStatus,
    /// The id was already known; nothing new was queued
    #[serde(default)]
    pub duplicate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResult {
    pub status: TurnStatus,
    /// The reply text, once published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<TurnResponse>,
    #[serde(default)]
    pub thinking_log: Vec<String>,
}

type ThreadLocks = Arc<Mutex<HashMap<ThreadId, Arc<tokio::sync::Mutex<()>>>>>;

#[derive(Clone)]
pub struct ChatService {
    orchestrator: Arc<Orchestrator>,
    threads: Arc<dyn ThreadStore>,
    turns: Arc<dyn TurnLedger>,
    progress: Arc<dyn ProgressLog>,
    sink: ProgressSink,
    workers: Arc<Semaphore>,
    thread_locks: ThreadLocks,
    stream_poll: Duration,
}

impl ChatService {
    pub fn new(
        orchestrator: Orchestrator,
        threads: Arc<dyn ThreadStore>,
        turns: Arc<dyn TurnLedger>,
        progress: Arc<dyn ProgressLog>,
        config: &ServiceConfig,
    ) -> Self {
        let sink = orchestrator.progress().clone();
        Self {
            orchestrator: Arc::new(orchestrator),
            threads,
            turns,
            progress,
            sink,
            workers: Arc::new(Semaphore::new(config.workers.max(1))),
            thread_locks: Arc::new(Mutex::new(HashMap::new())),
            stream_poll: Duration::from_millis(config.stream_poll_ms.max(10)),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        self.sink.bus()
    }

    /// Enqueue a turn. Idempotent on `correlation_id`.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, ServiceError> {
        if request.message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ServiceError::InvalidRequest(format!(
                "message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }

        let correlation_id = non_empty(request.correlation_id)
            .map(CorrelationId::from)
            .unwrap_or_default();
        let retry_of = non_empty(request.retry_of).map(CorrelationId::from);

        let (thread_id, message) = match &retry_of {
            Some(original) => {
                let record = self
                    .turns
                    .get(original)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("turn {original}")))?;
                let thread_id = non_empty(request.thread_id)
                    .map(ThreadId::from)
                    .unwrap_or(record.thread_id);
                let message = if request.message.trim().is_empty() {
                    record.message
                } else {
                    request.message
                };
                (thread_id, message)
            }
            None => (
                non_empty(request.thread_id).map(ThreadId::from).unwrap_or_default(),
                request.message,
            ),
        };

        let record = TurnRecord::pending(correlation_id.clone(), thread_id.clone(), &message, retry_of.clone());
        if let BeginOutcome::Existing(existing) = self.turns.begin(record).await? {
            info!(correlation_id = %correlation_id, status = existing.status.as_str(), "Duplicate submit, returning existing turn");
            return Ok(SubmitReceipt {
                correlation_id,
                thread_id: existing.thread_id,
                status: existing.status,
                duplicate: true,
            });
        }

        self.sink
            .emit(&correlation_id, ProgressKind::Queued, json!({ "thread_id": thread_id }))
            .await;
        info!(correlation_id = %correlation_id, thread_id = %thread_id, retry = retry_of.is_some(), "Turn queued");

        let service = self.clone();
        let turn = TurnRequest {
            correlation_id: correlation_id.clone(),
            thread_id: thread_id.clone(),
            message,
            retry_of,
        };
        tokio::spawn(async move { service.process(turn).await });

        Ok(SubmitReceipt {
            correlation_id,
            thread_id,
            status: TurnStatus::Pending,
            duplicate: false,
        })
    }

    async fn process(&self, request: TurnRequest) {
        let cid = request.correlation_id.clone();
        let thread_id = request.thread_id.clone();

        // Thread lock first, so a waiting turn does not hold a worker
        let lock = self.thread_lock(&thread_id);
        let guard = lock.lock().await;
        let permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(correlation_id = %cid, error = %e, "Worker pool closed");
                self.fail(&cid, &thread_id).await;
                return;
            }
        };
        debug!(correlation_id = %cid, available = self.workers.available_permits(), "Worker acquired");

        let outcome = AssertUnwindSafe(self.orchestrator.run(request)).catch_unwind().await;
        drop(permit);
        drop(guard);
        self.release_thread_lock(&thread_id, lock);

        if outcome.is_err() {
            error!(correlation_id = %cid, "Turn panicked outside the stage boundaries");
            self.fail(&cid, &thread_id).await;
        }
    }

    async fn fail(&self, cid: &CorrelationId, thread_id: &ThreadId) {
        let response = TurnResponse::minimal(cid.clone(), thread_id.clone(), FAILED_REPLY);
        if let Err(e) = self.turns.finish(cid, TurnStatus::Failed, &response).await {
            error!(correlation_id = %cid, error = %e, "Failed to record failure");
        }
        let payload = serde_json::to_value(&response).unwrap_or_else(|_| json!({ "message": FAILED_REPLY }));
        self.sink.emit(cid, ProgressKind::Failed, payload).await;
    }

    fn thread_lock(&self, id: &ThreadId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.thread_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(id.clone()).or_default().clone()
    }

    fn release_thread_lock(&self, id: &ThreadId, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.thread_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Ours plus the map's: nobody else is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
    }

    /// Current status, the response once published, and the thinking lines.
    pub async fn poll(&self, id: &CorrelationId) -> Result<PollResult, ServiceError> {
        let record = self.record(id).await?;
        let thinking_log = self
            .progress
            .read_after(id, 0)
            .await?
            .iter()
            .filter(|e| e.kind == ProgressKind::Thinking)
            .filter_map(|e| e.line().map(str::to_string))
            .collect();
        Ok(PollResult {
            status: record.status,
            message: record.response.as_ref().map(|r| r.message.clone()),
            response: record.response,
            thinking_log,
        })
    }

    /// Events with `seq > after`, ending after the terminal event.
    pub async fn stream(&self, id: &CorrelationId, after: u64) -> Result<ReceiverStream<ProgressEvent>, ServiceError> {
        self.record(id).await?;

        let (tx, rx) = mpsc::channel(64);
        let progress = self.progress.clone();
        let mut wake = self.bus().subscribe();
        let poll = self.stream_poll;
        let id = id.clone();

        tokio::spawn(async move {
            let mut last = after;
            loop {
                let events = match progress.read_after(&id, last).await {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(correlation_id = %id, error = %e, "Stream read failed");
                        return;
                    }
                };
                for event in events {
                    last = event.seq;
                    let terminal = event.kind.is_terminal();
                    if tx.send(event).await.is_err() {
                        debug!(correlation_id = %id, "Stream reader went away");
                        return;
                    }
                    if terminal {
                        return;
                    }
                }

                tokio::select! {
                    received = wake.recv() => {
                        if let Err(broadcast::error::RecvError::Closed) = received {
                            tokio::time::sleep(poll).await;
                        }
                    }
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Wait until the turn leaves `pending`, or `timeout` passes.
    pub async fn wait_for(&self, id: &CorrelationId, timeout: Duration) -> Result<TurnRecord, ServiceError> {
        let mut wake = self.bus().subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = self.record(id).await?;
            if record.status != TurnStatus::Pending || tokio::time::Instant::now() >= deadline {
                return Ok(record);
            }
            tokio::select! {
                _ = wake.recv() => {}
                _ = tokio::time::sleep(self.stream_poll) => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    pub async fn feedback(&self, id: &CorrelationId, rating: Rating, comment: Option<String>) -> Result<(), ServiceError> {
        let comment = comment
            .map(|c| c.trim().chars().take(MAX_COMMENT_CHARS).collect::<String>())
            .filter(|c| !c.is_empty());
        let feedback = Feedback {
            rating,
            comment,
            submitted_at: Utc::now(),
        };
        match self.turns.record_feedback(id, feedback).await {
            Ok(()) => {
                info!(correlation_id = %id, rating = ?rating, "Feedback recorded");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Err(ServiceError::NotFound(format!("turn {id}"))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn feedback_for(&self, id: &CorrelationId) -> Result<Option<Feedback>, ServiceError> {
        Ok(self.record(id).await?.feedback)
    }

    pub async fn thread(&self, id: &ThreadId) -> Result<Thread, ServiceError> {
        self.threads
            .load(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("thread {id}")))
    }

    async fn record(&self, id: &CorrelationId) -> Result<TurnRecord, ServiceError> {
        self.turns
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("turn {id}")))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
