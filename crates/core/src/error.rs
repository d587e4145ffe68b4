//! Errors, one enum per collaborator.
//!
//! Stage code matches on the collaborator errors to decide whether to
//! degrade; [`Error`] only exists for wiring code that wants a single `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),

    #[error("retrieval: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("tool: {0}")]
    Tool(#[from] ToolError),

    #[error("store: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed with status {status_code}: {message}")]
    ApiError { status_code: u16, message: String },

    /// Provider asked us to back off.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("network: {0}")]
    Network(String),

    /// A 2xx with no usable text.
    #[error("empty response: {0}")]
    EmptyResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    /// Neither channel could serve the query.
    #[error("no retrieval channel available (sparse: {sparse}; dense: {dense})")]
    Unavailable { sparse: String, dense: String },

    #[error("vector search failed: {0}")]
    VectorSearch(String),

    /// Corpus metadata (document store or probe file) unreadable.
    #[error("metadata: {0}")]
    Metadata(String),

    #[error("embedding failed: {0}")]
    Embedding(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("no tool named '{0}'")]
    NotFound(String),

    #[error("{tool_name} failed: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("{tool_name} gave no answer within {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("tool not configured: {0}")]
    NotConfigured(String),

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage: {0}")]
    Storage(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// Someone else saved the thread since it was loaded.
    #[error("thread {thread_id} is at version {found}, expected {expected}")]
    Conflict {
        thread_id: String,
        expected: u64,
        found: u64,
    },

    #[error("not found: {0}")]
    NotFound(String),
}
