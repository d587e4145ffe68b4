//! Dense channel: query embedding, nearest-neighbour search over pre-embedded
//! parent units, hydration through the metadata store.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use pursuit_core::error::RetrievalError;
use pursuit_core::retrieval::{Channel, Embedder, MetadataStore, RetrievalCandidate, VectorSearch};

use crate::calibration::{DenseCalibration, similarity_from_distance};
use crate::fusion::RetrievalChannel;

pub struct DenseChannel {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorSearch>,
    metadata: Arc<dyn MetadataStore>,
    calibration: DenseCalibration,
}

impl DenseChannel {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorSearch>,
        metadata: Arc<dyn MetadataStore>,
        calibration: DenseCalibration,
    ) -> Self {
        Self {
            embedder,
            vectors,
            metadata,
            calibration,
        }
    }
}

#[async_trait]
impl RetrievalChannel for DenseChannel {
    fn channel(&self) -> Channel {
        Channel::Dense
    }

    async fn search(
        &self,
        query: &str,
        filters: &[String],
        k: usize,
    ) -> std::result::Result<Vec<RetrievalCandidate>, RetrievalError> {
        let embedding = self.embedder.embed(query).await?;
        let hits = self.vectors.nearest(&embedding, filters, k).await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.parent_id.clone()).collect();
        let units = self.metadata.fetch_by_ids(&ids).await?;

        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(unit) = units.get(&hit.parent_id) else {
                warn!(parent_id = %hit.parent_id, "Vector hit has no published metadata, dropping");
                continue;
            };
            let similarity = similarity_from_distance(hit.distance);
            candidates.push(RetrievalCandidate {
                parent_id: hit.parent_id.clone(),
                raw_score: similarity,
                confidence: self.calibration.confidence(similarity),
                channel: Channel::Dense,
                provenance: hit.parent_id,
                citation: unit.citation.clone(),
                url: unit.url.clone(),
                text: unit.text.clone(),
                published_at: unit.published_at,
            });
        }

        debug!(count = candidates.len(), "Dense channel hydrated candidates");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{HashingEmbedder, InMemoryCorpus, InMemoryVectorIndex};
    use pursuit_core::retrieval::{ParentUnit, VectorHit};

    fn unit(id: &str, text: &str) -> ParentUnit {
        ParentUnit {
            id: id.into(),
            text: text.into(),
            tags: vec![],
            citation: format!("Doc {id}"),
            url: Some(format!("https://example.org/{id}")),
            published_at: None,
        }
    }

    struct FixedVectors(Vec<VectorHit>);

    #[async_trait]
    impl VectorSearch for FixedVectors {
        async fn nearest(
            &self,
            _embedding: &[f32],
            _filters: &[String],
            _k: usize,
        ) -> std::result::Result<Vec<VectorHit>, RetrievalError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn converts_distance_and_drops_unhydrated_hits() {
        let corpus = Arc::new(InMemoryCorpus::new(vec![unit("p1", "Prior authorization is required.")]));
        let vectors = Arc::new(FixedVectors(vec![
            VectorHit {
                parent_id: "p1".into(),
                distance: 0.24,
            },
            VectorHit {
                parent_id: "ghost".into(),
                distance: 0.1,
            },
        ]));
        let channel = DenseChannel::new(
            Arc::new(HashingEmbedder::new(64)),
            vectors,
            corpus,
            DenseCalibration::new(0.88, 0.65),
        );

        let candidates = channel.search("prior auth", &[], 5).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].parent_id, "p1");
        assert!((candidates[0].raw_score - 0.88).abs() < 1e-9);
        assert!((candidates[0].confidence - 0.65).abs() < 1e-9);
        assert_eq!(candidates[0].url.as_deref(), Some("https://example.org/p1"));
    }

    #[tokio::test]
    async fn end_to_end_with_in_memory_index() {
        let units = vec![
            unit("p1", "Prior authorization is required for MRI scans."),
            unit("p2", "Pharmacy benefits cover generic drugs."),
        ];
        let embedder = Arc::new(HashingEmbedder::new(128));
        let index = InMemoryVectorIndex::build(&units, embedder.as_ref()).await.unwrap();
        let channel = DenseChannel::new(
            embedder,
            Arc::new(index),
            Arc::new(InMemoryCorpus::new(units)),
            DenseCalibration::new(0.88, 0.65),
        );

        let candidates = channel.search("prior authorization for MRI scans", &[], 2).await.unwrap();
        assert_eq!(candidates[0].parent_id, "p1");
        assert!(candidates[0].confidence > candidates[1].confidence);
    }
}
