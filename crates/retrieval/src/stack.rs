//! Assembles a [`FusionEngine`] over the in-process collaborators from
//! configuration.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use pursuit_config::RetrievalConfig;
use pursuit_core::error::RetrievalError;
use pursuit_core::provider::Provider;
use pursuit_core::retrieval::{Channel, Embedder, ParentUnit};

use crate::calibration::{DenseCalibration, SigmoidCalibration};
use crate::dense::DenseChannel;
use crate::fusion::{FusionEngine, RetrievalChannel};
use crate::local::{HashingEmbedder, InMemoryCorpus, InMemoryVectorIndex, ProviderEmbedder};
use crate::sparse::{Bm25Params, SparseChannel, SparseIndex};

/// Everything needed to rebuild the engine with a different sparse curve.
pub struct LocalStack {
    pub corpus: Arc<InMemoryCorpus>,
    pub sparse_index: Arc<SparseIndex>,
    dense: Arc<dyn RetrievalChannel>,
    config: RetrievalConfig,
}

impl LocalStack {
    /// Load the configured corpus (empty when no path is set) and index it.
    pub async fn load(
        config: &RetrievalConfig,
        provider: Option<Arc<dyn Provider>>,
    ) -> std::result::Result<Self, RetrievalError> {
        let corpus = match &config.corpus_path {
            Some(path) => InMemoryCorpus::from_jsonl(path).await?,
            None => {
                warn!("No retrieval corpus configured, every lookup will abstain");
                InMemoryCorpus::new(Vec::new())
            }
        };
        Self::from_units(corpus.units().to_vec(), config, provider).await
    }

    pub async fn from_units(
        units: Vec<ParentUnit>,
        config: &RetrievalConfig,
        provider: Option<Arc<dyn Provider>>,
    ) -> std::result::Result<Self, RetrievalError> {
        let embedder: Arc<dyn Embedder> = match (config.dense.embedder.as_str(), provider) {
            ("provider", Some(provider)) => Arc::new(ProviderEmbedder::new(
                provider,
                config.dense.embedding_model.clone(),
                config.dense.dimensions,
            )),
            ("provider", None) => {
                warn!("Provider embedder requested without a provider, using hashing embedder");
                Arc::new(HashingEmbedder::new(config.dense.dimensions))
            }
            _ => Arc::new(HashingEmbedder::new(config.dense.dimensions)),
        };

        let vectors = InMemoryVectorIndex::build(&units, embedder.as_ref()).await?;
        let params = Bm25Params {
            k1: config.sparse.k1,
            b: config.sparse.b,
        };
        let sparse_index = Arc::new(SparseIndex::build(units.clone(), params));
        let corpus = Arc::new(InMemoryCorpus::new(units));

        let dense: Arc<dyn RetrievalChannel> = Arc::new(DenseChannel::new(
            embedder,
            Arc::new(vectors),
            corpus.clone(),
            DenseCalibration::new(config.dense.anchor_similarity, config.dense.anchor_confidence),
        ));

        info!(
            units = corpus.len(),
            sentences = sparse_index.sentence_count(),
            embedder = %config.dense.embedder,
            "Retrieval stack ready"
        );

        Ok(Self {
            corpus,
            sparse_index,
            dense,
            config: config.clone(),
        })
    }

    pub fn configured_calibration(&self) -> SigmoidCalibration {
        SigmoidCalibration::new(self.config.sparse.sigmoid_k, self.config.sparse.sigmoid_x0)
    }

    pub fn sparse_channel(&self, calibration: SigmoidCalibration) -> SparseChannel {
        SparseChannel::new(self.sparse_index.clone(), calibration)
    }

    /// The engine with the configured sparse calibration.
    pub fn engine(&self) -> FusionEngine {
        self.engine_with(self.configured_calibration(), self.config.answer_threshold)
    }

    pub fn engine_with(&self, calibration: SigmoidCalibration, threshold: f64) -> FusionEngine {
        let priority: Vec<Channel> = self
            .config
            .channel_priority
            .iter()
            .filter_map(|c| Channel::parse(c))
            .collect();

        FusionEngine::new(threshold)
            .with_priority(priority)
            .with_top_k(self.config.top_k)
            .with_channel_timeout(Duration::from_secs(self.config.channel_timeout_secs))
            .with_channel(Arc::new(self.sparse_channel(calibration)))
            .with_channel(self.dense.clone())
            .with_summary(self.summary())
    }

    /// One-line description of what the corpus covers.
    pub fn summary(&self) -> String {
        if self.corpus.is_empty() {
            return "no documents are loaded".into();
        }
        let tags = self.corpus.tags();
        if tags.is_empty() {
            format!("{} published document sections", self.corpus.len())
        } else {
            format!(
                "{} published document sections covering {}",
                self.corpus.len(),
                tags.join(", ")
            )
        }
    }
}
