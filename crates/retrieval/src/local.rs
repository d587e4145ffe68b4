//! In-process stand-ins for the external retrieval collaborators.
//!
//! `InMemoryCorpus` plays the relational metadata store (loaded from a JSONL
//! export of published parent units), `InMemoryVectorIndex` the vector search
//! service. `HashingEmbedder` needs no network; `ProviderEmbedder` calls the
//! configured LLM provider's embedding endpoint.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use pursuit_core::error::RetrievalError;
use pursuit_core::provider::{EmbeddingRequest, Provider};
use pursuit_core::retrieval::{Embedder, MetadataStore, ParentUnit, VectorHit, VectorSearch};

use crate::text::tokenize;

/// Published parent units held in memory.
#[derive(Debug)]
pub struct InMemoryCorpus {
    units: Vec<ParentUnit>,
    by_id: HashMap<String, usize>,
}

impl InMemoryCorpus {
    pub fn new(units: Vec<ParentUnit>) -> Self {
        let by_id = units.iter().enumerate().map(|(i, u)| (u.id.clone(), i)).collect();
        Self { units, by_id }
    }

    /// Load one JSON parent unit per line. Blank lines are skipped; a line
    /// that does not parse is skipped with a warning.
    pub async fn from_jsonl(path: &Path) -> std::result::Result<Self, RetrievalError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RetrievalError::Metadata(format!("{}: {e}", path.display())))?;

        let mut units = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ParentUnit>(line) {
                Ok(unit) => units.push(unit),
                Err(e) => warn!(line = line_no + 1, error = %e, "Skipping malformed corpus line"),
            }
        }

        info!(path = %path.display(), units = units.len(), "Loaded corpus");
        Ok(Self::new(units))
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[ParentUnit] {
        &self.units
    }

    /// Distinct tags across the corpus, sorted.
    pub fn tags(&self) -> Vec<String> {
        self.units
            .iter()
            .flat_map(|u| u.tags.iter().map(|t| t.to_ascii_lowercase()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[async_trait]
impl MetadataStore for InMemoryCorpus {
    async fn fetch_by_ids(&self, ids: &[String]) -> std::result::Result<HashMap<String, ParentUnit>, RetrievalError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.by_id.get(id).map(|&i| (id.clone(), self.units[i].clone())))
            .collect())
    }

    async fn list_units(&self) -> std::result::Result<Vec<ParentUnit>, RetrievalError> {
        Ok(self.units.clone())
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]; 0.0 if the lengths differ or either is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    dot / denom
}

struct IndexedVector {
    parent_id: String,
    tags: Vec<String>,
    embedding: Vec<f32>,
}

/// Brute-force cosine nearest-neighbour index.
pub struct InMemoryVectorIndex {
    entries: Vec<IndexedVector>,
}

impl InMemoryVectorIndex {
    /// Embed every unit's text with `embedder`.
    pub async fn build(units: &[ParentUnit], embedder: &dyn Embedder) -> std::result::Result<Self, RetrievalError> {
        let mut entries = Vec::with_capacity(units.len());
        for unit in units {
            entries.push(IndexedVector {
                parent_id: unit.id.clone(),
                tags: unit.tags.clone(),
                embedding: embedder.embed(&unit.text).await?,
            });
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl VectorSearch for InMemoryVectorIndex {
    async fn nearest(
        &self,
        embedding: &[f32],
        filters: &[String],
        k: usize,
    ) -> std::result::Result<Vec<VectorHit>, RetrievalError> {
        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .filter(|e| filters.iter().all(|f| e.tags.iter().any(|t| t.eq_ignore_ascii_case(f))))
            .map(|e| VectorHit {
                parent_id: e.parent_id.clone(),
                distance: 1.0 - cosine_similarity(&e.embedding, embedding),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.parent_id.cmp(&b.parent_id)));
        hits.truncate(k);
        Ok(hits)
    }
}

/// Feature-hashing embedder over unigrams and bigrams (FNV-1a, signed buckets,
/// L2-normalised). Deterministic and offline.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn fnv1a(bytes: &[u8]) -> u64 {
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in bytes {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }

    fn add(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = Self::fnv1a(feature.as_bytes());
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dimensions];
        for token in &tokens {
            self.add(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, RetrievalError> {
        Ok(self.embed_sync(text))
    }
}

/// Embeds through the LLM provider's embedding endpoint.
pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
    dimensions: usize,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, RetrievalError> {
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: vec![text.to_string()],
            })
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Embedding(format!("{} returned no embedding", self.model)))
    }
}
