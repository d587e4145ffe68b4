//! Retrieval domain types and the external collaborator traits behind it.
//!
//! The vector search service and the relational metadata store are external;
//! these traits are their only contracts. The fusion engine itself is
//! exposed to the pipeline through [`Retriever`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::RetrievalError;

/// A retrieval channel. Declaration order is not priority; priority is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sparse,
    Dense,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sparse => "sparse",
            Self::Dense => "dense",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sparse" => Some(Self::Sparse),
            "dense" => Some(Self::Dense),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A citable document span: the common key both channels are scored on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentUnit {
    pub id: String,
    pub text: String,
    /// Jurisdiction/domain tags used for filtering
    #[serde(default)]
    pub tags: Vec<String>,
    /// Human-readable provenance (document title, section)
    #[serde(default)]
    pub citation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl ParentUnit {
    /// Whether this unit carries every one of `filters` (case-insensitive).
    /// An empty filter set matches everything.
    pub fn matches(&self, filters: &[String]) -> bool {
        filters
            .iter()
            .all(|f| self.tags.iter().any(|t| t.eq_ignore_ascii_case(f)))
    }
}

/// One scored evidence unit. Ephemeral, never persisted beyond the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub parent_id: String,
    /// Channel-native score (BM25 score or cosine similarity)
    pub raw_score: f64,
    /// Calibrated confidence in [0, 1]
    pub confidence: f64,
    /// The channel whose confidence won fusion
    pub channel: Channel,
    /// Citation pointer (e.g. the matching sentence id for sparse hits)
    pub provenance: String,
    /// The parent's citation label
    pub citation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Matching evidence text (best sentence for sparse, parent text for dense)
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// The binary evidence decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Answer,
    /// Evidence insufficient. `partial_channel` is set when only one channel responded.
    Abstain { partial_channel: bool },
}

impl Decision {
    pub fn is_answer(self) -> bool {
        matches!(self, Self::Answer)
    }
}

/// Fused result of one retrieval call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Ranked best-first; attached even when abstaining
    pub candidates: Vec<RetrievalCandidate>,
    pub decision: Decision,
    /// The channel that failed, when the engine degraded to the survivor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_channel: Option<Channel>,
}

impl RetrievalOutcome {
    pub fn top(&self) -> Option<&RetrievalCandidate> {
        self.candidates.first()
    }

    pub fn is_partial(&self) -> bool {
        self.failed_channel.is_some()
    }
}

/// One nearest-neighbour hit from the vector search service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub parent_id: String,
    /// Cosine distance in [0, 2]
    pub distance: f64,
}

/// External vector search service.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Ranked parent ids with distances, nearest first.
    async fn nearest(
        &self,
        embedding: &[f32],
        filters: &[String],
        k: usize,
    ) -> std::result::Result<Vec<VectorHit>, RetrievalError>;
}

/// External relational metadata store holding published parent units.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Hydrate ids into citable units. Unknown ids are absent from the map.
    async fn fetch_by_ids(&self, ids: &[String]) -> std::result::Result<HashMap<String, ParentUnit>, RetrievalError>;

    /// Every published unit; used to build the sparse index.
    async fn list_units(&self) -> std::result::Result<Vec<ParentUnit>, RetrievalError>;
}

/// Turns query text into the embedding space of the vector index.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, RetrievalError>;
}

/// The retrieval fusion engine as seen by the resolver.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, filters: &[String]) -> std::result::Result<RetrievalOutcome, RetrievalError>;

    /// A one-line summary of what the corpus covers, for capability answers.
    fn corpus_summary(&self) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(tags: &[&str]) -> ParentUnit {
        ParentUnit {
            id: "p1".into(),
            text: "text".into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            citation: String::new(),
            url: None,
            published_at: None,
        }
    }

    #[test]
    fn filter_matching_is_conjunctive_and_case_insensitive() {
        let u = unit(&["Florida", "medicaid"]);
        assert!(u.matches(&[]));
        assert!(u.matches(&["florida".into()]));
        assert!(u.matches(&["FLORIDA".into(), "Medicaid".into()]));
        assert!(!u.matches(&["florida".into(), "aetna".into()]));
    }

    #[test]
    fn channel_parse() {
        assert_eq!(Channel::parse(" Sparse "), Some(Channel::Sparse));
        assert_eq!(Channel::parse("hybrid"), None);
    }

    #[test]
    fn decision_serializes_with_tag() {
        let json = serde_json::to_string(&Decision::Abstain { partial_channel: true }).unwrap();
        assert_eq!(json, r#"{"decision":"abstain","partial_channel":true}"#);
    }
}
