//! Routing decisions produced by the blueprint router.
//!
//! [`Strategy`] is a closed set. Adding a strategy means adding a variant
//! here and a mapping in the router; the resolver dispatches with `match`.

use serde::{Deserialize, Serialize};

use crate::plan::FallbackRule;

/// Which external tool a tool strategy invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    WebSearch,
    PageFetch,
    Capabilities,
}

impl ToolKind {
    /// Registry name of the tool implementing this kind.
    pub fn tool_name(self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::PageFetch => "page_fetch",
            Self::Capabilities => "capabilities",
        }
    }
}

/// The answering strategy chosen for one sub-question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "tool", rename_all = "snake_case")]
pub enum Strategy {
    Retrieval,
    Tool(ToolKind),
    Reasoning,
    /// Deterministic refusal; nothing external is called
    Refusal,
}

impl Strategy {
    pub fn label(self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Tool(ToolKind::WebSearch) => "tool:web_search",
            Self::Tool(ToolKind::PageFetch) => "tool:page_fetch",
            Self::Tool(ToolKind::Capabilities) => "tool:capabilities",
            Self::Reasoning => "reasoning",
            Self::Refusal => "refusal",
        }
    }
}

/// Which router rule produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingRule {
    PatientIdentifier,
    EmbeddedUrl,
    SearchPhrase,
    CapabilityQuestion,
    Declared,
}

/// One routing decision per sub-question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintEntry {
    pub sub_question_id: String,

    /// The sub-question text as planned
    pub question: String,

    pub strategy: Strategy,

    /// Rewritten text handed to the resolver (merged with prior context
    /// for underspecified follow-ups); a URL for page fetches
    pub query: String,

    /// Retrieval filter tags (jurisdiction/domain)
    #[serde(default)]
    pub filter_tags: Vec<String>,

    pub fallback: FallbackRule,

    pub rule: RoutingRule,

    /// Whether `query` was merged with the previous turn's context
    #[serde(default)]
    pub merged: bool,
}

/// The router's output for a whole plan, in plan order.
pub type Blueprint = Vec<BlueprintEntry>;
