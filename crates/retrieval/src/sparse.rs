//! Sparse channel: sentence-level BM25 mapped back to parent units.
//!
//! The corpus is decomposed into sentences; each query is scored against
//! every sentence with Okapi BM25 and a parent's raw score is the maximum
//! over its sentences. Raw scores are calibrated with a global sigmoid so
//! confidence is comparable across queries.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use pursuit_core::error::RetrievalError;
use pursuit_core::retrieval::{Channel, MetadataStore, ParentUnit, RetrievalCandidate};

use crate::calibration::SigmoidCalibration;
use crate::fusion::RetrievalChannel;
use crate::text::{split_sentences, tokenize};

/// BM25 free parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

#[derive(Debug, Clone)]
struct Sentence {
    id: String,
    parent: usize,
    text: String,
    len: usize,
}

/// Best-scoring sentence of one parent for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseHit {
    pub parent_id: String,
    pub sentence_id: String,
    pub sentence: String,
    pub raw_score: f64,
}

/// An immutable inverted index over the sentences of a corpus snapshot.
pub struct SparseIndex {
    parents: Vec<ParentUnit>,
    sentences: Vec<Sentence>,
    /// term -> (sentence index, term frequency)
    postings: HashMap<String, Vec<(usize, u32)>>,
    avg_len: f64,
    params: Bm25Params,
}

impl SparseIndex {
    pub fn build(units: Vec<ParentUnit>, params: Bm25Params) -> Self {
        let mut sentences = Vec::new();
        let mut postings: HashMap<String, Vec<(usize, u32)>> = HashMap::new();
        let mut total_len = 0usize;

        for (parent_idx, unit) in units.iter().enumerate() {
            for (i, text) in split_sentences(&unit.text).into_iter().enumerate() {
                let tokens = tokenize(&text);
                let mut tf: HashMap<String, u32> = HashMap::new();
                for token in &tokens {
                    *tf.entry(token.clone()).or_default() += 1;
                }
                let sentence_idx = sentences.len();
                for (term, count) in tf {
                    postings.entry(term).or_default().push((sentence_idx, count));
                }
                total_len += tokens.len();
                sentences.push(Sentence {
                    id: format!("{}#s{}", unit.id, i),
                    parent: parent_idx,
                    text,
                    len: tokens.len(),
                });
            }
        }

        let avg_len = if sentences.is_empty() {
            0.0
        } else {
            total_len as f64 / sentences.len() as f64
        };

        debug!(
            parents = units.len(),
            sentences = sentences.len(),
            terms = postings.len(),
            "Built sparse index"
        );

        Self {
            parents: units,
            sentences,
            postings,
            avg_len,
            params,
        }
    }

    pub fn sentence_count(&self) -> usize {
        self.sentences.len()
    }

    pub fn parents(&self) -> &[ParentUnit] {
        &self.parents
    }

    fn idf(&self, df: usize) -> f64 {
        let n = self.sentences.len() as f64;
        let df = df as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Per-parent best sentence scores, highest first, restricted to parents
    /// carrying every filter tag. Parents with no matching term are omitted.
    pub fn search(&self, query: &str, filters: &[String], k: usize) -> Vec<SparseHit> {
        let terms = tokenize(query);
        if terms.is_empty() || self.sentences.is_empty() {
            return Vec::new();
        }

        let Bm25Params { k1, b } = self.params;
        let avg_len = self.avg_len.max(f64::EPSILON);
        let mut scores: HashMap<usize, f64> = HashMap::new();

        for term in &terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(list.len());
            for &(sentence_idx, tf) in list {
                let sentence = &self.sentences[sentence_idx];
                if !self.parents[sentence.parent].matches(filters) {
                    continue;
                }
                let tf = f64::from(tf);
                let norm = k1 * (1.0 - b + b * sentence.len as f64 / avg_len);
                *scores.entry(sentence_idx).or_default() += idf * tf * (k1 + 1.0) / (tf + norm);
            }
        }

        let mut best: HashMap<usize, (usize, f64)> = HashMap::new();
        for (sentence_idx, score) in scores {
            let parent = self.sentences[sentence_idx].parent;
            let entry = best.entry(parent).or_insert((sentence_idx, score));
            if score > entry.1 || (score == entry.1 && sentence_idx < entry.0) {
                *entry = (sentence_idx, score);
            }
        }

        let mut hits: Vec<SparseHit> = best
            .into_iter()
            .map(|(parent, (sentence_idx, raw_score))| {
                let sentence = &self.sentences[sentence_idx];
                SparseHit {
                    parent_id: self.parents[parent].id.clone(),
                    sentence_id: sentence.id.clone(),
                    sentence: sentence.text.clone(),
                    raw_score,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.raw_score
                .total_cmp(&a.raw_score)
                .then_with(|| a.parent_id.cmp(&b.parent_id))
        });
        hits.truncate(k);
        hits
    }

    fn parent(&self, id: &str) -> Option<&ParentUnit> {
        self.parents.iter().find(|p| p.id == id)
    }
}

/// The sparse retrieval channel.
pub struct SparseChannel {
    index: Arc<SparseIndex>,
    calibration: SigmoidCalibration,
}

impl SparseChannel {
    pub fn new(index: Arc<SparseIndex>, calibration: SigmoidCalibration) -> Self {
        Self { index, calibration }
    }

    /// Build the index from every unit the metadata store publishes.
    pub async fn from_store(
        store: &dyn MetadataStore,
        params: Bm25Params,
        calibration: SigmoidCalibration,
    ) -> std::result::Result<Self, RetrievalError> {
        let units = store.list_units().await?;
        Ok(Self::new(Arc::new(SparseIndex::build(units, params)), calibration))
    }

    pub fn index(&self) -> &SparseIndex {
        &self.index
    }

    pub fn calibration(&self) -> SigmoidCalibration {
        self.calibration
    }

    /// Highest raw score for a query; input to the global sigmoid fit.
    pub fn max_raw(&self, query: &str, filters: &[String]) -> f64 {
        self.index
            .search(query, filters, 1)
            .first()
            .map(|h| h.raw_score)
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl RetrievalChannel for SparseChannel {
    fn channel(&self) -> Channel {
        Channel::Sparse
    }

    async fn search(
        &self,
        query: &str,
        filters: &[String],
        k: usize,
    ) -> std::result::Result<Vec<RetrievalCandidate>, RetrievalError> {
        let hits = self.index.search(query, filters, k);
        let candidates = hits
            .into_iter()
            .filter_map(|hit| {
                let parent = self.index.parent(&hit.parent_id)?;
                Some(RetrievalCandidate {
                    parent_id: hit.parent_id,
                    raw_score: hit.raw_score,
                    confidence: self.calibration.confidence(hit.raw_score),
                    channel: Channel::Sparse,
                    provenance: hit.sentence_id,
                    citation: parent.citation.clone(),
                    url: parent.url.clone(),
                    text: hit.sentence,
                    published_at: parent.published_at,
                })
            })
            .collect();
        Ok(candidates)
    }
}
