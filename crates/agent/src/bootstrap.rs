//! Wiring from configuration to a running [`ChatService`].

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use pursuit_config::AppConfig;
use pursuit_core::event::EventBus;
use pursuit_core::provider::Provider;
use pursuit_core::retrieval::Retriever;
use pursuit_core::tool::ToolRegistry;
use pursuit_retrieval::LocalStack;
use pursuit_store::StoreHandles;

use crate::continuity::ContinuityTracker;
use crate::integrator::Integrator;
use crate::orchestrator::{Orchestrator, ProgressSink};
use crate::planner::Planner;
use crate::resolver::Resolver;
use crate::service::ChatService;

/// Build the full service from configuration: provider chain, local
/// retrieval stack, tool registry and the configured store.
pub async fn build(config: &AppConfig) -> pursuit_core::Result<ChatService> {
    let provider = pursuit_providers::build_from_config(config).chain();
    let stack = LocalStack::load(&config.retrieval, Some(provider.clone())).await?;
    let summary = stack.summary();
    let retriever: Arc<dyn Retriever> = Arc::new(stack.engine());
    let tools = pursuit_tools::default_registry(&config.tools, &summary);
    let store = pursuit_store::open(&config.store).await?;

    info!(
        provider = %config.default_provider,
        model = %config.default_model,
        corpus = %summary,
        tools = tools.names().len(),
        "Service assembled"
    );
    Ok(assemble(config, provider, retriever, tools, store))
}

/// Assemble the stage pipeline from already-built parts.
pub fn assemble(
    config: &AppConfig,
    provider: Arc<dyn Provider>,
    retriever: Arc<dyn Retriever>,
    tools: ToolRegistry,
    store: StoreHandles,
) -> ChatService {
    let model = config.default_model.clone();

    let planner = Planner::new(provider.clone(), &model)
        .with_max_sub_questions(config.planner.max_sub_questions)
        .with_timeout(Duration::from_secs(config.planner.timeout_secs));
    let resolver = Resolver::with_config(retriever, Arc::new(tools), provider.clone(), &model, &config.resolver)
        .with_max_tokens(config.default_max_tokens);
    let tracker = ContinuityTracker::new(&config.continuity);
    let integrator = Integrator::new(provider, &model)
        .with_timeout(Duration::from_secs(config.resolver.reasoning_timeout_secs))
        .with_max_tokens(config.default_max_tokens);

    let sink = ProgressSink::new(store.progress.clone(), Arc::new(EventBus::default()));
    let orchestrator = Orchestrator::new(
        planner,
        resolver,
        tracker,
        integrator,
        store.threads.clone(),
        store.turns.clone(),
        sink,
    );

    ChatService::new(orchestrator, store.threads, store.turns, store.progress, &config.service)
}
