//! Integrator: one reply out of the turn's sub-question resolutions.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use pursuit_core::answer::{Citation, SubQuestionResolution};
use pursuit_core::provider::{Provider, ProviderRequest};

use crate::continuity::ContinuityUpdate;
use crate::prompts;

#[derive(Debug, Clone, PartialEq)]
pub struct Integrated {
    pub message: String,
    pub sources: Vec<Citation>,
}

pub struct Integrator {
    provider: Arc<dyn Provider>,
    model: String,
    timeout: Duration,
    max_tokens: u32,
}

impl Integrator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: Duration::from_secs(30),
            max_tokens: 1024,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub async fn integrate(
        &self,
        message: &str,
        resolutions: &[SubQuestionResolution],
        update: &ContinuityUpdate,
    ) -> Integrated {
        let parts = answered_parts(resolutions);
        let combined = if parts.len() > 1 {
            self.combine(message, &parts).await
        } else {
            None
        };
        assemble(resolutions, update, &parts, combined)
    }

    async fn combine(&self, message: &str, parts: &[(String, String)]) -> Option<String> {
        let request = ProviderRequest::prompt(
            &self.model,
            prompts::INTEGRATOR_SYSTEM,
            prompts::integrator_input(message, parts),
        )
        .with_temperature(0.2)
        .with_max_tokens(self.max_tokens);

        match timeout(self.timeout, self.provider.complete(request)).await {
            Ok(Ok(response)) => {
                let text = response.message.content.trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Integration call failed, joining part answers");
                None
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Integration timed out, joining part answers");
                None
            }
        }
    }
}

/// The reply without any LLM call: part answers joined in plan order.
pub fn plain(resolutions: &[SubQuestionResolution], update: &ContinuityUpdate) -> Integrated {
    assemble(resolutions, update, &answered_parts(resolutions), None)
}

fn answered_parts(resolutions: &[SubQuestionResolution]) -> Vec<(String, String)> {
    resolutions
        .iter()
        .filter(|r| r.is_answered())
        .filter_map(|r| r.answer.as_ref().map(|a| (r.question.clone(), a.text.clone())))
        .collect()
}

fn assemble(
    resolutions: &[SubQuestionResolution],
    update: &ContinuityUpdate,
    parts: &[(String, String)],
    combined: Option<String>,
) -> Integrated {
    let body = match parts {
        [] => unresolved_statement(resolutions),
        [(_, only)] => only.clone(),
        _ => combined.unwrap_or_else(|| join_parts(parts)),
    };

    let mut sections = Vec::new();
    if let Some(closure) = &update.closure {
        sections.push(closure.clone());
    }
    if !body.is_empty() {
        sections.push(body);
    }
    match &update.user_ask {
        Some(ask) => sections.push(ask.clone()),
        None if parts.is_empty() && update.closure.is_none() => {
            let asks = direct_asks(resolutions);
            if !asks.is_empty() {
                sections.push(asks);
            }
        }
        None => {}
    }

    Integrated {
        message: sections.join("\n\n"),
        sources: sources(resolutions),
    }
}

fn join_parts(parts: &[(String, String)]) -> String {
    parts
        .iter()
        .map(|(question, answer)| format!("**{question}**\n{answer}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn unresolved_statement(resolutions: &[SubQuestionResolution]) -> String {
    let open: Vec<String> = resolutions
        .iter()
        .filter(|r| !r.question.trim().is_empty())
        .map(|r| format!("\"{}\"", r.question.trim()))
        .collect();
    if open.is_empty() {
        String::new()
    } else {
        format!("I could not resolve {} this time.", open.join(", "))
    }
}

fn direct_asks(resolutions: &[SubQuestionResolution]) -> String {
    resolutions
        .iter()
        .filter_map(|r| r.failure.map(|reason| reason.user_ask(&r.question)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Citations of every answered part, first occurrence wins.
pub fn sources(resolutions: &[SubQuestionResolution]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    resolutions
        .iter()
        .filter(|r| r.is_answered())
        .filter_map(|r| r.answer.as_ref())
        .flat_map(|a| a.citations.iter())
        .filter(|c| seen.insert(c.source_id.clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use pursuit_core::answer::{Answer, FailureReason, ResolutionState};
    use pursuit_core::blueprint::Strategy;

    fn answered(id: &str, q: &str, text: &str, source: &str) -> SubQuestionResolution {
        SubQuestionResolution::answered(
            id,
            q,
            Strategy::Retrieval,
            ResolutionState::Answered,
            Answer {
                text: text.into(),
                confidence: 0.8,
                citations: vec![Citation {
                    source_id: source.into(),
                    label: source.into(),
                    url: None,
                }],
            },
        )
    }

    fn no_update() -> ContinuityUpdate {
        ContinuityUpdate {
            objective: None,
            user_ask: None,
            closure: None,
        }
    }

    #[tokio::test]
    async fn single_answer_is_passed_through() {
        let provider = Arc::new(echo_planner());
        let integrator = Integrator::new(provider.clone(), "m");
        let out = integrator
            .integrate("q", &[answered("sq1", "q", "Covered [1].", "a")], &no_update())
            .await;
        assert_eq!(out.message, "Covered [1].");
        assert_eq!(out.sources.len(), 1);
        assert_eq!(provider.calls_to(prompts::INTEGRATOR_SYSTEM), 0);
    }

    #[tokio::test]
    async fn several_answers_are_combined_with_deduplicated_sources() {
        let provider = Arc::new(echo_planner());
        let integrator = Integrator::new(provider.clone(), "m");
        let out = integrator
            .integrate(
                "income and assets?",
                &[
                    answered("sq1", "income?", "Income A [1].", "manual-1"),
                    answered("sq2", "assets?", "Assets B [1].", "manual-1"),
                ],
                &no_update(),
            )
            .await;
        assert_eq!(out.message, "Integrated answer.");
        assert_eq!(out.sources.len(), 1);
        assert_eq!(provider.calls_to(prompts::INTEGRATOR_SYSTEM), 1);
    }

    #[tokio::test]
    async fn failed_combination_joins_parts() {
        let provider = Arc::new(RuleProvider::new().fail_on(prompts::INTEGRATOR_SYSTEM));
        let integrator = Integrator::new(provider, "m");
        let out = integrator
            .integrate(
                "x",
                &[answered("sq1", "income?", "Income A.", "a"), answered("sq2", "assets?", "Assets B.", "b")],
                &no_update(),
            )
            .await;
        assert!(out.message.contains("**income?**\nIncome A."));
        assert!(out.message.contains("**assets?**\nAssets B."));
    }

    #[tokio::test]
    async fn asks_and_closures_are_appended() {
        let integrator = Integrator::new(Arc::new(echo_planner()), "m");
        let failed = SubQuestionResolution::failed(
            "sq1",
            "Ohio CHIP asset limit",
            Strategy::Retrieval,
            ResolutionState::NoEvidence,
            FailureReason::NoEvidence,
        );

        let out = integrator.integrate("x", std::slice::from_ref(&failed), &no_update()).await;
        assert!(out.message.starts_with("I could not resolve \"Ohio CHIP asset limit\""));
        assert!(out.message.contains(&FailureReason::NoEvidence.user_ask("Ohio CHIP asset limit")));

        let closing = ContinuityUpdate {
            objective: None,
            user_ask: None,
            closure: Some("I've tried this several times.".into()),
        };
        let out = integrator.integrate("x", &[failed], &closing).await;
        assert!(out.message.starts_with("I've tried this several times."));
        assert!(!out.message.contains("Can you tell me"));
    }
}
