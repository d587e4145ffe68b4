//! Tool collaborators for Pursuit.
//!
//! Tools are black boxes to the resolver: each takes JSON arguments and
//! returns text or a typed failure. The resolver owns the timeout.

pub mod capabilities;
pub mod page_fetch;
pub mod web_search;

use pursuit_config::ToolsConfig;
use pursuit_core::tool::ToolRegistry;

pub use capabilities::CapabilitiesTool;
pub use page_fetch::PageFetchTool;
pub use web_search::WebSearchTool;

/// Build the registry: `web_search`, `page_fetch` and a `capabilities` tool
/// that describes the other two plus the retrieval corpus.
pub fn default_registry(config: &ToolsConfig, corpus_summary: &str) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(WebSearchTool::new(
        config.search_endpoint.clone(),
        config.search_api_key.clone(),
    )));
    registry.register(Box::new(PageFetchTool::new(config.fetch_max_chars)));

    let described = registry.descriptions();
    registry.register(Box::new(CapabilitiesTool::new(described, corpus_summary)));
    registry
}
