//! The Pursuit turn pipeline.
//!
//! One user message runs through fixed stages:
//!
//! 1. **Classify and plan**: split the message into sub-questions
//! 2. **Route**: pick a strategy per sub-question and rewrite follow-ups
//! 3. **Resolve**: retrieval, a tool, or reasoning, with one fallback
//! 4. **Track**: fold the outcome into the thread's master objective
//! 5. **Integrate**: one reply with citations and any clarifying ask
//!
//! Every stage is guarded; a failing stage degrades the reply instead of
//! losing it. [`ChatService`] wraps the pipeline with the idempotent
//! submit/poll/stream boundary and a bounded worker pool.

pub mod bootstrap;
pub mod continuity;
pub mod cues;
pub mod integrator;
pub mod jurisdiction;
pub mod orchestrator;
pub mod phi;
pub mod planner;
pub mod prompts;
pub mod resolver;
pub mod router;
pub mod service;

#[cfg(test)]
mod test_helpers;

pub use continuity::{ContinuityTracker, ContinuityUpdate, Intent};
pub use integrator::{Integrated, Integrator};
pub use jurisdiction::Jurisdiction;
pub use orchestrator::{Orchestrator, ProgressSink, TurnRequest};
pub use planner::Planner;
pub use resolver::Resolver;
pub use cues::MessageCues;
pub use router::route;
pub use service::{ChatService, PollResult, ServiceError, SubmitReceipt, SubmitRequest};
