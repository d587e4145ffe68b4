//! # Pursuit Core
//!
//! The domain model of the Pursuit question answering engine: plans,
//! blueprints, resolutions, master objectives, threads and progress events.
//!
//! Each external collaborator (language model, vector search, relational
//! metadata, tools, persistence) is a trait in this crate, and every other
//! crate in the workspace depends inward on it. The only runtime dependency
//! is `tokio::sync`, for the progress broadcast.

pub mod answer;
pub mod blueprint;
pub mod error;
pub mod event;
pub mod message;
pub mod objective;
pub mod plan;
pub mod provider;
pub mod retrieval;
pub mod store;
pub mod thread;
pub mod tool;

pub use answer::{Answer, Citation, FailureReason, ResolutionState, SubQuestionResolution, TurnResponse};
pub use blueprint::{Blueprint, BlueprintEntry, RoutingRule, Strategy, ToolKind};
pub use error::{Error, ProviderError, Result, RetrievalError, StoreError, ToolError};
pub use event::{EventBus, ProgressEvent, ProgressKind};
pub use message::{Message, Role};
pub use objective::{MasterObjective, ObjectiveStatus, SubObjective, SubObjectiveStatus};
pub use plan::{CapabilityNeed, Classification, FallbackRule, Plan, PlanSource, SubQuestion, SubQuestionKind};
pub use provider::{EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage};
pub use retrieval::{
    Channel, Decision, Embedder, MetadataStore, ParentUnit, RetrievalCandidate, RetrievalOutcome, Retriever,
    VectorHit, VectorSearch,
};
pub use store::{BeginOutcome, Feedback, ProgressLog, Rating, ThreadStore, TurnLedger, TurnRecord};
pub use thread::{ContinuityContext, CorrelationId, Thread, ThreadId, Turn, TurnStatus};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
