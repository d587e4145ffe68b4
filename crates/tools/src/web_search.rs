//! Web search tool: queries a JSON search API.
//!
//! The endpoint is any service answering `GET <endpoint>?q=<query>&count=<n>`
//! with a JSON body holding a result array under `results`, `web.results`
//! or `items`. Each result needs a `url` (or `link`) and a `title`; the
//! snippet is read from `snippet`, `description` or `content`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use pursuit_core::error::ToolError;
use pursuit_core::tool::{Tool, ToolResult};

const TOOL_NAME: &str = "web_search";

pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl WebSearchTool {
    pub fn new(endpoint: Option<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("pursuit/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint,
            api_key,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Pull search results out of the common response shapes.
pub fn parse_results(body: &Value, limit: usize) -> Vec<SearchResult> {
    let items = body["results"]
        .as_array()
        .or_else(|| body["web"]["results"].as_array())
        .or_else(|| body["items"].as_array());

    let Some(items) = items else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let url = item["url"].as_str().or_else(|| item["link"].as_str())?;
            let title = item["title"].as_str().unwrap_or(url);
            let snippet = item["snippet"]
                .as_str()
                .or_else(|| item["description"].as_str())
                .or_else(|| item["content"].as_str())
                .unwrap_or_default();
            Some(SearchResult {
                title: title.trim().to_string(),
                url: url.trim().to_string(),
                snippet: snippet.trim().to_string(),
            })
        })
        .take(limit)
        .collect()
}

/// Numbered plain-text listing handed to the reasoning model.
pub fn format_results(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[{}] {}\n{}\n{}", i + 1, r.title, r.url, r.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the web for current public information. Returns titles, URLs, and snippets."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "description": "Number of results to return (default 5)",
                    "default": 5
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let num_results = arguments["num_results"].as_u64().unwrap_or(5).clamp(1, 10) as usize;

        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| ToolError::NotConfigured("web_search has no search endpoint".into()))?;

        debug!(query = %query, "Running web search");

        let count = num_results.to_string();
        let mut request = self
            .client
            .get(endpoint)
            .query(&[("q", query), ("count", count.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: TOOL_NAME.into(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::ExecutionFailed {
                tool_name: TOOL_NAME.into(),
                reason: format!("search endpoint returned {status}"),
            });
        }

        let body: Value = response.json().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: TOOL_NAME.into(),
            reason: format!("unreadable search response: {e}"),
        })?;

        let results = parse_results(&body, num_results);
        if results.is_empty() {
            warn!(query = %query, "Web search returned no results");
            return Ok(ToolResult::nothing(format!("No web results for '{query}'"), vec![]));
        }

        Ok(ToolResult::found(
            format_results(&results),
            results.iter().map(|r| r.url.clone()).collect(),
        ))
    }
}
