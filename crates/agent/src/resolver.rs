//! Resolver: executes one blueprint entry against its strategy.
//!
//! Per sub-question the state runs `pending -> in_progress -> terminal`.
//! Every external call (retrieval, tool, LLM) runs under its own timeout;
//! a timeout counts as no evidence or a tool failure, never a hang. A
//! declared fallback runs at most once per sub-question per turn.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use pursuit_config::ResolverConfig;
use pursuit_core::answer::{Answer, Citation, FailureReason, ResolutionState, SubQuestionResolution};
use pursuit_core::blueprint::{BlueprintEntry, Strategy, ToolKind};
use pursuit_core::error::{RetrievalError, ToolError};
use pursuit_core::plan::FallbackRule;
use pursuit_core::provider::{Provider, ProviderRequest};
use pursuit_core::retrieval::{RetrievalCandidate, RetrievalOutcome, Retriever};
use pursuit_core::tool::{ToolCall, ToolRegistry};

use crate::prompts;

/// Confidence attached to answers synthesized from web material.
pub const TOOL_CONFIDENCE: f64 = 0.5;
/// The capabilities tool describes this deployment, so it is trusted.
pub const CAPABILITY_CONFIDENCE: f64 = 0.9;
/// Answers with no source at all.
pub const REASONING_CONFIDENCE: f64 = 0.3;

pub struct Resolver {
    retriever: Arc<dyn Retriever>,
    tools: Arc<ToolRegistry>,
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: u32,
    retrieval_timeout: Duration,
    tool_timeout: Duration,
    reasoning_timeout: Duration,
    evidence_per_answer: usize,
}

impl Resolver {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        tools: Arc<ToolRegistry>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
    ) -> Self {
        Self::with_config(retriever, tools, provider, model, &ResolverConfig::default())
    }

    pub fn with_config(
        retriever: Arc<dyn Retriever>,
        tools: Arc<ToolRegistry>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        config: &ResolverConfig,
    ) -> Self {
        Self {
            retriever,
            tools,
            provider,
            model: model.into(),
            max_tokens: 1024,
            retrieval_timeout: Duration::from_secs(config.retrieval_timeout_secs),
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
            reasoning_timeout: Duration::from_secs(config.reasoning_timeout_secs),
            evidence_per_answer: config.evidence_per_answer.max(1),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn corpus_summary(&self) -> String {
        self.retriever.corpus_summary()
    }

    /// Resolve one entry. Never fails: every outcome is a typed resolution.
    pub async fn resolve(&self, entry: &BlueprintEntry) -> SubQuestionResolution {
        debug!(
            sub_question = %entry.sub_question_id,
            strategy = entry.strategy.label(),
            query = %entry.query,
            "Resolving sub-question"
        );

        let resolution = match entry.strategy {
            Strategy::Refusal => failed(entry, Strategy::Refusal, ResolutionState::Refused, FailureReason::PatientIdentifier),
            Strategy::Retrieval => self.by_retrieval(entry).await,
            Strategy::Tool(kind) => match self.by_tool(entry, kind).await {
                Ok(resolution) => resolution,
                Err(e) => {
                    warn!(sub_question = %entry.sub_question_id, tool = kind.tool_name(), error = %e, "Tool failed");
                    self.fallback(entry, Strategy::Tool(kind), FailureReason::ToolUnavailable).await
                }
            },
            Strategy::Reasoning => self.by_reasoning(entry).await,
        };

        info!(
            sub_question = %entry.sub_question_id,
            strategy = resolution.strategy.label(),
            state = ?resolution.state,
            fallback_used = resolution.fallback_used,
            partial_channel = resolution.partial_channel,
            "Sub-question resolved"
        );
        resolution
    }

    async fn by_retrieval(&self, entry: &BlueprintEntry) -> SubQuestionResolution {
        let partial = match timeout(
            self.retrieval_timeout,
            self.retriever.retrieve(&entry.query, &entry.filter_tags),
        )
        .await
        {
            Ok(Ok(outcome)) if outcome.decision.is_answer() && !outcome.candidates.is_empty() => {
                return self.grounded(entry, &outcome).await;
            }
            Ok(Ok(outcome)) => {
                debug!(
                    sub_question = %entry.sub_question_id,
                    best = outcome.top().map(|c| c.confidence).unwrap_or(0.0),
                    "Retrieval abstained"
                );
                outcome.is_partial()
            }
            Ok(Err(RetrievalError::Unavailable { sparse, dense })) => {
                warn!(sub_question = %entry.sub_question_id, %sparse, %dense, "Retrieval unavailable");
                return failed(
                    entry,
                    Strategy::Retrieval,
                    ResolutionState::NoEvidence,
                    FailureReason::RetrievalUnavailable,
                );
            }
            Ok(Err(e)) => {
                warn!(sub_question = %entry.sub_question_id, error = %e, "Retrieval failed, treating as no evidence");
                false
            }
            Err(_) => {
                warn!(
                    sub_question = %entry.sub_question_id,
                    timeout_secs = self.retrieval_timeout.as_secs(),
                    "Retrieval timed out, treating as no evidence"
                );
                false
            }
        };

        let mut resolution = self.fallback(entry, Strategy::Retrieval, FailureReason::NoEvidence).await;
        resolution.partial_channel = partial;
        resolution
    }

    /// Run the declared fallback once. `reason` is what the primary
    /// strategy could not do.
    async fn fallback(&self, entry: &BlueprintEntry, from: Strategy, reason: FailureReason) -> SubQuestionResolution {
        let from_tool = matches!(from, Strategy::Tool(_));
        let mut resolution = match entry.fallback {
            FallbackRule::None => return failed(entry, from, state_for(reason), reason),
            FallbackRule::TryTool if !from_tool => match self.by_tool(entry, ToolKind::WebSearch).await {
                Ok(resolution) => resolution,
                Err(e) => {
                    warn!(sub_question = %entry.sub_question_id, error = %e, "Fallback search failed");
                    failed(entry, Strategy::Tool(ToolKind::WebSearch), ResolutionState::ToolFailed, reason)
                }
            },
            FallbackRule::TryTool | FallbackRule::TryReasoning => self.by_reasoning(entry).await,
        };
        debug!(sub_question = %entry.sub_question_id, from = from.label(), to = resolution.strategy.label(), "Fallback ran");
        resolution.fallback_used = true;
        resolution
    }

    async fn grounded(&self, entry: &BlueprintEntry, outcome: &RetrievalOutcome) -> SubQuestionResolution {
        let evidence: Vec<RetrievalCandidate> = outcome.candidates.iter().take(self.evidence_per_answer).cloned().collect();
        let confidence = outcome.top().map(|c| c.confidence).unwrap_or(0.0);

        let text = match self
            .complete(prompts::GROUNDED_SYSTEM, prompts::evidence_input(asked(entry), &evidence))
            .await
        {
            Some(text) => text,
            None => {
                warn!(sub_question = %entry.sub_question_id, "Grounded synthesis failed, answering with top evidence");
                evidence.first().map(|c| c.text.clone()).unwrap_or_default()
            }
        };

        let mut resolution = SubQuestionResolution::answered(
            &entry.sub_question_id,
            &entry.question,
            Strategy::Retrieval,
            ResolutionState::Answered,
            Answer {
                text,
                confidence,
                citations: candidate_citations(&evidence),
            },
        );
        resolution.partial_channel = outcome.is_partial();
        resolution
    }

    async fn by_tool(&self, entry: &BlueprintEntry, kind: ToolKind) -> Result<SubQuestionResolution, ToolError> {
        let tool_name = kind.tool_name();
        let arguments = match kind {
            ToolKind::PageFetch => serde_json::json!({ "url": entry.query }),
            ToolKind::WebSearch | ToolKind::Capabilities => serde_json::json!({ "query": asked(entry) }),
        };
        let call = ToolCall {
            id: format!("{}-{tool_name}", entry.sub_question_id),
            name: tool_name.to_string(),
            arguments,
        };

        let result = match timeout(self.tool_timeout, self.tools.execute(&call)).await {
            Ok(Ok(result)) if result.success => result,
            Ok(Ok(result)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: tool_name.to_string(),
                    reason: result.output,
                });
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool_name: tool_name.to_string(),
                    timeout_secs: self.tool_timeout.as_secs(),
                });
            }
        };

        let (text, confidence) = match kind {
            ToolKind::Capabilities => (result.output.clone(), CAPABILITY_CONFIDENCE),
            ToolKind::WebSearch | ToolKind::PageFetch => {
                let text = self
                    .complete(prompts::TOOL_SYSTEM, prompts::tool_input(asked(entry), &result.output))
                    .await
                    .unwrap_or_else(|| result.output.clone());
                (text, TOOL_CONFIDENCE)
            }
        };

        Ok(SubQuestionResolution::answered(
            &entry.sub_question_id,
            &entry.question,
            Strategy::Tool(kind),
            ResolutionState::Answered,
            Answer {
                text,
                confidence,
                citations: source_citations(&result.sources),
            },
        ))
    }

    async fn by_reasoning(&self, entry: &BlueprintEntry) -> SubQuestionResolution {
        match self.complete(prompts::REASONING_SYSTEM, asked(entry).to_string()).await {
            Some(text) => SubQuestionResolution::answered(
                &entry.sub_question_id,
                &entry.question,
                Strategy::Reasoning,
                ResolutionState::ReasoningOnly,
                Answer {
                    text,
                    confidence: REASONING_CONFIDENCE,
                    citations: Vec::new(),
                },
            ),
            None => failed(
                entry,
                Strategy::Reasoning,
                ResolutionState::NoEvidence,
                FailureReason::ReasoningUnavailable,
            ),
        }
    }

    /// One LLM call under the reasoning timeout. `None` on error, timeout
    /// or an empty reply.
    async fn complete(&self, system: &str, user: String) -> Option<String> {
        let request = ProviderRequest::prompt(&self.model, system, user)
            .with_temperature(0.2)
            .with_max_tokens(self.max_tokens);
        match timeout(self.reasoning_timeout, self.provider.complete(request)).await {
            Ok(Ok(response)) => {
                let text = response.message.content.trim().to_string();
                if text.is_empty() {
                    warn!(provider = self.provider.name(), "LLM returned an empty reply");
                    None
                } else {
                    Some(text)
                }
            }
            Ok(Err(e)) => {
                warn!(provider = self.provider.name(), error = %e, "LLM call failed");
                None
            }
            Err(_) => {
                warn!(
                    provider = self.provider.name(),
                    timeout_secs = self.reasoning_timeout.as_secs(),
                    "LLM call timed out"
                );
                None
            }
        }
    }
}

/// The text to send downstream: the merged query when routing produced one.
fn asked(entry: &BlueprintEntry) -> &str {
    if entry.query.trim().is_empty() {
        &entry.question
    } else {
        &entry.query
    }
}

fn failed(
    entry: &BlueprintEntry,
    strategy: Strategy,
    state: ResolutionState,
    reason: FailureReason,
) -> SubQuestionResolution {
    SubQuestionResolution::failed(&entry.sub_question_id, &entry.question, strategy, state, reason)
}

fn state_for(reason: FailureReason) -> ResolutionState {
    match reason {
        FailureReason::ToolUnavailable => ResolutionState::ToolFailed,
        FailureReason::PatientIdentifier => ResolutionState::Refused,
        _ => ResolutionState::NoEvidence,
    }
}

fn candidate_citations(candidates: &[RetrievalCandidate]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|c| seen.insert(c.parent_id.clone()))
        .map(|c| Citation {
            source_id: c.parent_id.clone(),
            label: if c.citation.is_empty() { c.parent_id.clone() } else { c.citation.clone() },
            url: c.url.clone(),
        })
        .collect()
}

fn source_citations(sources: &[String]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    sources
        .iter()
        .filter(|s| seen.insert(s.as_str()))
        .map(|s| Citation {
            source_id: s.clone(),
            label: s.clone(),
            url: Some(s.clone()),
        })
        .collect()
}
