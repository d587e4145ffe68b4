//! A service wired to canned collaborators.

use std::sync::Arc;

use async_trait::async_trait;

use pursuit_agent::{ChatService, bootstrap};
use pursuit_config::AppConfig;
use pursuit_core::error::{ProviderError, RetrievalError};
use pursuit_core::message::Message;
use pursuit_core::provider::{Provider, ProviderRequest, ProviderResponse};
use pursuit_core::retrieval::{Channel, Decision, RetrievalCandidate, RetrievalOutcome, Retriever};
use pursuit_core::tool::ToolRegistry;
use pursuit_store::StoreHandles;

/// Answers every prompt with the same line; plans fall back to the message.
struct CannedProvider;

#[async_trait]
impl Provider for CannedProvider {
    fn name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message: Message::assistant("Adult dental is covered for emergencies [1]."),
            usage: None,
            model: request.model,
        })
    }
}

/// Always answers with one Florida manual section.
struct ManualRetriever;

#[async_trait]
impl Retriever for ManualRetriever {
    async fn retrieve(&self, _query: &str, _filters: &[String]) -> Result<RetrievalOutcome, RetrievalError> {
        Ok(RetrievalOutcome {
            candidates: vec![RetrievalCandidate {
                parent_id: "fl-dental".into(),
                raw_score: 7.5,
                confidence: 0.9,
                channel: Channel::Sparse,
                provenance: "fl-dental#s1".into(),
                citation: "Florida Medicaid Dental Handbook".into(),
                url: None,
                text: "Adult dental is covered for emergencies.".into(),
                published_at: None,
            }],
            decision: Decision::Answer,
            failed_channel: None,
        })
    }
}

pub fn test_service() -> ChatService {
    bootstrap::assemble(
        &AppConfig::default(),
        Arc::new(CannedProvider),
        Arc::new(ManualRetriever),
        ToolRegistry::new(),
        StoreHandles::in_memory(),
    )
}
