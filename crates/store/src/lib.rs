//! Persistence for Pursuit: versioned thread documents, the turn ledger and
//! the append-only progress log.
//!
//! Two backends implement all three core store traits:
//! - [`InMemoryStore`]: process memory, for tests and throwaway runs
//! - [`SqliteStore`]: a single SQLite file via `sqlx`

pub mod in_memory;
pub mod sqlite;

use std::sync::Arc;
use tracing::info;

use pursuit_config::StoreConfig;
use pursuit_core::error::StoreError;
use pursuit_core::store::{ProgressLog, ThreadStore, TurnLedger};

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// The three store handles the service needs, usually backed by one object.
#[derive(Clone)]
pub struct StoreHandles {
    pub threads: Arc<dyn ThreadStore>,
    pub turns: Arc<dyn TurnLedger>,
    pub progress: Arc<dyn ProgressLog>,
}

impl StoreHandles {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: ThreadStore + TurnLedger + ProgressLog + 'static,
    {
        Self {
            threads: backend.clone(),
            turns: backend.clone(),
            progress: backend,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(InMemoryStore::new()))
    }
}

/// Open the configured backend.
pub async fn open(config: &StoreConfig) -> Result<StoreHandles, StoreError> {
    match config.backend.as_str() {
        "memory" => {
            info!("Using in-memory store");
            Ok(StoreHandles::in_memory())
        }
        "sqlite" => {
            let path = config.resolved_path();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Storage(format!("create {}: {e}", parent.display())))?;
            }
            let store = SqliteStore::new(&path.to_string_lossy()).await?;
            Ok(StoreHandles::from_backend(Arc::new(store)))
        }
        other => Err(StoreError::Storage(format!("unknown store backend '{other}'"))),
    }
}
