//! SQLite backend.
//!
//! Three tables:
//! - `threads`: one JSON thread document per id with an integer version
//!   used for optimistic concurrency
//! - `turn_records`: one row per correlation id; the primary key is the
//!   idempotence gate for `submit`
//! - `progress_events`: append-only, keyed by `(correlation_id, seq)`;
//!   the next sequence is computed inside the insert statement

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use pursuit_core::answer::TurnResponse;
use pursuit_core::error::StoreError;
use pursuit_core::event::{ProgressEvent, ProgressKind};
use pursuit_core::store::{BeginOutcome, Feedback, ProgressLog, ThreadStore, TurnLedger, TurnRecord};
use pursuit_core::thread::{CorrelationId, Thread, ThreadId, TurnStatus};

pub struct SqliteStore {
    pool: SqlitePool,
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn query_err(context: &str) -> impl Fn(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::QueryFailed(format!("{context}: {e}"))
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    ///
    /// `"sqlite::memory:"` gives an ephemeral database held on a single
    /// connection.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite://{path}")
        };
        let in_memory = url.contains(":memory:");

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(if in_memory {
                SqliteJournalMode::Memory
            } else {
                SqliteJournalMode::Wal
            })
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 4 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(path = %path, "SQLite store initialized");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            (
                "threads table",
                r#"
                CREATE TABLE IF NOT EXISTS threads (
                    id          TEXT PRIMARY KEY NOT NULL,
                    version     INTEGER NOT NULL,
                    document    TEXT NOT NULL,
                    created_at  TEXT NOT NULL,
                    updated_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "turn_records table",
                r#"
                CREATE TABLE IF NOT EXISTS turn_records (
                    correlation_id  TEXT PRIMARY KEY NOT NULL,
                    thread_id       TEXT NOT NULL,
                    message         TEXT NOT NULL,
                    retry_of        TEXT,
                    status          TEXT NOT NULL,
                    response        TEXT,
                    feedback        TEXT,
                    created_at      TEXT NOT NULL,
                    updated_at      TEXT NOT NULL
                )
                "#,
            ),
            (
                "turn_records index",
                "CREATE INDEX IF NOT EXISTS idx_turn_records_thread ON turn_records(thread_id, created_at)",
            ),
            (
                "progress_events table",
                r#"
                CREATE TABLE IF NOT EXISTS progress_events (
                    correlation_id  TEXT NOT NULL,
                    seq             INTEGER NOT NULL,
                    kind            TEXT NOT NULL,
                    payload         TEXT NOT NULL,
                    created_at      TEXT NOT NULL,
                    PRIMARY KEY (correlation_id, seq)
                )
                "#,
            ),
        ];

        for (name, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{name}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_record(row: &SqliteRow) -> Result<TurnRecord, StoreError> {
        let get = |column: &str| -> Result<Option<String>, StoreError> {
            row.try_get(column)
                .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
        };
        let required = |column: &str| -> Result<String, StoreError> {
            get(column)?.ok_or_else(|| StoreError::QueryFailed(format!("{column} is null")))
        };

        let status_str = required("status")?;
        let status = TurnStatus::parse(&status_str)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown turn status '{status_str}'")))?;

        let response = match get("response")? {
            Some(json) => Some(
                serde_json::from_str::<TurnResponse>(&json)
                    .map_err(|e| StoreError::QueryFailed(format!("response document: {e}")))?,
            ),
            None => None,
        };
        let feedback = get("feedback")?.and_then(|json| serde_json::from_str::<Feedback>(&json).ok());

        Ok(TurnRecord {
            correlation_id: CorrelationId::from(required("correlation_id")?),
            thread_id: ThreadId::from(required("thread_id")?),
            message: required("message")?,
            retry_of: get("retry_of")?.map(CorrelationId::from),
            status,
            response,
            feedback,
            created_at: parse_time(&required("created_at")?),
            updated_at: parse_time(&required("updated_at")?),
        })
    }

    fn row_to_event(row: &SqliteRow) -> Result<ProgressEvent, StoreError> {
        let correlation_id: String = row.try_get("correlation_id").map_err(query_err("correlation_id column"))?;
        let seq: i64 = row.try_get("seq").map_err(query_err("seq column"))?;
        let kind_str: String = row.try_get("kind").map_err(query_err("kind column"))?;
        let payload: String = row.try_get("payload").map_err(query_err("payload column"))?;
        let created_at: String = row.try_get("created_at").map_err(query_err("created_at column"))?;

        let kind = ProgressKind::parse(&kind_str)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown event kind '{kind_str}'")))?;

        Ok(ProgressEvent {
            correlation_id: CorrelationId::from(correlation_id),
            seq: seq.max(0) as u64,
            kind,
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            timestamp: parse_time(&created_at),
        })
    }
}

#[async_trait]
impl ThreadStore for SqliteStore {
    async fn load(&self, id: &ThreadId) -> Result<Option<Thread>, StoreError> {
        let row = sqlx::query("SELECT version, document FROM threads WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err("load thread"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let version: i64 = row.try_get("version").map_err(query_err("version column"))?;
        let document: String = row.try_get("document").map_err(query_err("document column"))?;
        let mut thread: Thread = serde_json::from_str(&document)
            .map_err(|e| StoreError::QueryFailed(format!("thread document: {e}")))?;
        thread.version = version.max(0) as u64;
        Ok(Some(thread))
    }

    async fn save(&self, thread: &Thread, expected_version: u64) -> Result<u64, StoreError> {
        let new_version = expected_version + 1;
        let now = Utc::now();

        let mut stored = thread.clone();
        stored.version = new_version;
        stored.updated_at = now;
        let document = serde_json::to_string(&stored)
            .map_err(|e| StoreError::Storage(format!("serialize thread: {e}")))?;

        let affected = if expected_version == 0 {
            sqlx::query(
                "INSERT OR IGNORE INTO threads (id, version, document, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(thread.id.as_str())
            .bind(new_version as i64)
            .bind(&document)
            .bind(thread.created_at.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(query_err("insert thread"))?
            .rows_affected()
        } else {
            sqlx::query("UPDATE threads SET version = ?, document = ?, updated_at = ? WHERE id = ? AND version = ?")
                .bind(new_version as i64)
                .bind(&document)
                .bind(now.to_rfc3339())
                .bind(thread.id.as_str())
                .bind(expected_version as i64)
                .execute(&self.pool)
                .await
                .map_err(query_err("update thread"))?
                .rows_affected()
        };

        if affected == 0 {
            let found: Option<i64> = sqlx::query_scalar("SELECT version FROM threads WHERE id = ?")
                .bind(thread.id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(query_err("read thread version"))?;
            return Err(StoreError::Conflict {
                thread_id: thread.id.to_string(),
                expected: expected_version,
                found: found.unwrap_or(0).max(0) as u64,
            });
        }

        Ok(new_version)
    }
}

#[async_trait]
impl TurnLedger for SqliteStore {
    async fn begin(&self, record: TurnRecord) -> Result<BeginOutcome, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO turn_records
                (correlation_id, thread_id, message, retry_of, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.correlation_id.as_str())
        .bind(record.thread_id.as_str())
        .bind(&record.message)
        .bind(record.retry_of.as_ref().map(|c| c.as_str()))
        .bind(record.status.as_str())
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(query_err("insert turn record"))?
        .rows_affected();

        if inserted == 1 {
            return Ok(BeginOutcome::Created);
        }

        match self.get(&record.correlation_id).await? {
            Some(existing) => Ok(BeginOutcome::Existing(existing)),
            None => Err(StoreError::NotFound(format!("turn {}", record.correlation_id))),
        }
    }

    async fn finish(&self, id: &CorrelationId, status: TurnStatus, response: &TurnResponse) -> Result<(), StoreError> {
        let json = serde_json::to_string(response)
            .map_err(|e| StoreError::Storage(format!("serialize response: {e}")))?;
        let affected = sqlx::query("UPDATE turn_records SET status = ?, response = ?, updated_at = ? WHERE correlation_id = ?")
            .bind(status.as_str())
            .bind(json)
            .bind(Utc::now().to_rfc3339())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(query_err("finish turn"))?
            .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(format!("turn {id}")));
        }
        Ok(())
    }

    async fn get(&self, id: &CorrelationId) -> Result<Option<TurnRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM turn_records WHERE correlation_id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err("get turn"))?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn record_feedback(&self, id: &CorrelationId, feedback: Feedback) -> Result<(), StoreError> {
        let json = serde_json::to_string(&feedback)
            .map_err(|e| StoreError::Storage(format!("serialize feedback: {e}")))?;
        let affected = sqlx::query("UPDATE turn_records SET feedback = ?, updated_at = ? WHERE correlation_id = ?")
            .bind(json)
            .bind(Utc::now().to_rfc3339())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(query_err("record feedback"))?
            .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(format!("turn {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressLog for SqliteStore {
    async fn append(
        &self,
        id: &CorrelationId,
        kind: ProgressKind,
        payload: serde_json::Value,
    ) -> Result<ProgressEvent, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO progress_events (correlation_id, seq, kind, payload, created_at)
            SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3, ?4
            FROM progress_events WHERE correlation_id = ?1
            RETURNING correlation_id, seq, kind, payload, created_at
            "#,
        )
        .bind(id.as_str())
        .bind(kind.as_str())
        .bind(payload.to_string())
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(query_err("append progress event"))?;

        Self::row_to_event(&row)
    }

    async fn read_after(&self, id: &CorrelationId, after: u64) -> Result<Vec<ProgressEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT correlation_id, seq, kind, payload, created_at FROM progress_events \
             WHERE correlation_id = ? AND seq > ? ORDER BY seq ASC",
        )
        .bind(id.as_str())
        .bind(after.min(i64::MAX as u64) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err("read progress events"))?;

        rows.iter().map(Self::row_to_event).collect()
    }
}
