//! Retrieval fusion: parallel channel queries, max-confidence fusion on the
//! parent unit, and the answer/abstain decision.
//!
//! Channels are independent evidence sources, so a parent's fused confidence
//! is the maximum of its per-channel confidences. Ranking ties are broken by
//! the configured channel priority, then by recency, then by parent id.

use async_trait::async_trait;
use futures::future::join_all;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use pursuit_core::error::RetrievalError;
use pursuit_core::retrieval::{Channel, Decision, RetrievalCandidate, RetrievalOutcome, Retriever};

/// One retrieval channel as seen by the fusion engine.
#[async_trait]
pub trait RetrievalChannel: Send + Sync {
    fn channel(&self) -> Channel;

    /// Calibrated candidates for `query`, at most `k`, best first.
    async fn search(
        &self,
        query: &str,
        filters: &[String],
        k: usize,
    ) -> std::result::Result<Vec<RetrievalCandidate>, RetrievalError>;
}

/// The binary evidence decision for a fixed candidate list.
///
/// Pure in `(candidates, threshold)`: raising the threshold can only turn
/// `Answer` into `Abstain`.
pub fn decide(candidates: &[RetrievalCandidate], threshold: f64, partial_channel: bool) -> Decision {
    match candidates.first() {
        Some(top) if top.confidence >= threshold => Decision::Answer,
        _ => Decision::Abstain { partial_channel },
    }
}

/// Fuse per-channel candidate lists on `parent_id`.
///
/// `priority` lists channels best first. The winning candidate for a parent is
/// the one with the highest confidence; equal confidences keep the higher
/// priority channel's candidate.
pub fn fuse(
    per_channel: Vec<(Channel, Vec<RetrievalCandidate>)>,
    priority: &[Channel],
    top_k: usize,
) -> Vec<RetrievalCandidate> {
    let rank = |channel: Channel| priority.iter().position(|c| *c == channel).unwrap_or(priority.len());

    let mut per_channel = per_channel;
    per_channel.sort_by_key(|(channel, _)| rank(*channel));

    let mut fused: HashMap<String, RetrievalCandidate> = HashMap::new();
    for (_, candidates) in per_channel {
        for candidate in candidates {
            match fused.get_mut(&candidate.parent_id) {
                Some(existing) if candidate.confidence > existing.confidence => *existing = candidate,
                Some(_) => {}
                None => {
                    fused.insert(candidate.parent_id.clone(), candidate);
                }
            }
        }
    }

    let mut ranked: Vec<RetrievalCandidate> = fused.into_values().collect();
    ranked.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| rank(a.channel).cmp(&rank(b.channel)))
            .then_with(|| match (a.published_at, b.published_at) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.parent_id.cmp(&b.parent_id))
    });
    ranked.truncate(top_k);
    ranked
}

/// Parallel two-channel retrieval with a calibrated decision.
pub struct FusionEngine {
    channels: Vec<Arc<dyn RetrievalChannel>>,
    priority: Vec<Channel>,
    threshold: f64,
    top_k: usize,
    channel_timeout: Duration,
    summary: String,
}

impl FusionEngine {
    pub fn new(threshold: f64) -> Self {
        Self {
            channels: Vec::new(),
            priority: vec![Channel::Sparse, Channel::Dense],
            threshold,
            top_k: 10,
            channel_timeout: Duration::from_secs(8),
            summary: String::new(),
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn RetrievalChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_priority(mut self, priority: Vec<Channel>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = timeout;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Query every channel concurrently, each under its own timeout.
    async fn query_channels(
        &self,
        query: &str,
        filters: &[String],
    ) -> Vec<(Channel, std::result::Result<Vec<RetrievalCandidate>, String>)> {
        let calls = self.channels.iter().map(|channel| {
            let kind = channel.channel();
            async move {
                let result = match tokio::time::timeout(self.channel_timeout, channel.search(query, filters, self.top_k)).await {
                    Ok(Ok(candidates)) => Ok(candidates),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {:?}", self.channel_timeout)),
                };
                (kind, result)
            }
        });
        join_all(calls).await
    }
}

#[async_trait]
impl Retriever for FusionEngine {
    async fn retrieve(&self, query: &str, filters: &[String]) -> std::result::Result<RetrievalOutcome, RetrievalError> {
        let results = self.query_channels(query, filters).await;

        let mut succeeded = Vec::new();
        let mut failures: HashMap<Channel, String> = HashMap::new();
        for (channel, result) in results {
            match result {
                Ok(candidates) => {
                    debug!(channel = %channel, count = candidates.len(), "Channel returned candidates");
                    succeeded.push((channel, candidates));
                }
                Err(reason) => {
                    warn!(channel = %channel, reason = %reason, "Retrieval channel failed");
                    failures.insert(channel, reason);
                }
            }
        }

        if succeeded.is_empty() {
            let reason = |c: Channel| failures.get(&c).cloned().unwrap_or_else(|| "not configured".into());
            return Err(RetrievalError::Unavailable {
                sparse: reason(Channel::Sparse),
                dense: reason(Channel::Dense),
            });
        }

        let failed_channel = self
            .priority
            .iter()
            .copied()
            .find(|c| failures.contains_key(c))
            .or_else(|| failures.keys().next().copied());

        let candidates = fuse(succeeded, &self.priority, self.top_k);
        let decision = decide(&candidates, self.threshold, failed_channel.is_some());

        info!(
            decision = ?decision,
            confidence = candidates.first().map(|c| c.confidence).unwrap_or(0.0),
            channel = candidates.first().map(|c| c.channel.as_str()).unwrap_or("none"),
            partial = failed_channel.is_some(),
            "Retrieval fused"
        );

        Ok(RetrievalOutcome {
            candidates,
            decision,
            failed_channel,
        })
    }

    fn corpus_summary(&self) -> String {
        self.summary.clone()
    }
}
