//! External tools the resolver can fall back on when the corpus is silent:
//! web search, page fetch and the capability listing.
//!
//! A tool either produces text (possibly with source URLs for citation) or
//! a [`ToolError`]. Tools never apply their own deadline; the resolver wraps
//! every call in one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// One invocation of a named tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Log correlation, echoed back on the result.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// What a tool produced.
///
/// `success == false` means the tool ran but had nothing usable (no search
/// hits, a page without text). Transport failures are a [`ToolError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    pub output: String,
    /// URLs the output was drawn from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl ToolResult {
    pub fn found(output: impl Into<String>, sources: Vec<String>) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            output: output.into(),
            sources,
        }
    }

    /// The tool ran but came back empty-handed; `output` says why.
    pub fn nothing(output: impl Into<String>, sources: Vec<String>) -> Self {
        Self {
            success: false,
            ..Self::found(output, sources)
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key, e.g. `web_search`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for `arguments`.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;
}

/// Tools by name. Iteration order is alphabetical.
#[derive(Default)]
pub struct ToolRegistry {
    by_name: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A later tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.by_name.insert(tool.name().to_owned(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.by_name.get(name).map(|tool| tool.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        let Some(tool) = self.get(&call.name) else {
            return Err(ToolError::NotFound(call.name.clone()));
        };
        let result = tool.execute(call.arguments.clone()).await?;
        Ok(ToolResult {
            call_id: call.id.clone(),
            ..result
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.by_name.keys().map(String::as_str).collect()
    }

    /// `(name, description)` for every tool, as shown by the capability listing.
    pub fn descriptions(&self) -> Vec<(String, String)> {
        self.by_name
            .iter()
            .map(|(name, tool)| (name.clone(), tool.description().to_owned()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shout;

    #[async_trait]
    impl Tool for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn description(&self) -> &str {
            "Repeats the query in capitals"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            })
        }

        async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError> {
            match arguments["query"].as_str() {
                Some("") => Ok(ToolResult::nothing("nothing to repeat", vec![])),
                Some(query) => Ok(ToolResult::found(
                    query.to_uppercase(),
                    vec!["https://example.org/shout".into()],
                )),
                None => Err(ToolError::InvalidArguments("missing 'query'".into())),
            }
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Shout));
        registry
    }

    fn call(arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "sq1-shout".into(),
            name: "shout".into(),
            arguments,
        }
    }

    #[test]
    fn lookup_by_name() {
        let registry = registry();
        assert!(registry.contains("shout"));
        assert!(registry.get("web_search").is_none());
        assert_eq!(registry.names(), vec!["shout"]);
        assert_eq!(
            registry.descriptions(),
            vec![("shout".to_string(), "Repeats the query in capitals".to_string())]
        );
    }

    #[tokio::test]
    async fn execute_echoes_the_call_id() {
        let result = registry()
            .execute(&call(serde_json::json!({"query": "dental"})))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "DENTAL");
        assert_eq!(result.call_id, "sq1-shout");
        assert_eq!(result.sources.len(), 1);
    }

    #[tokio::test]
    async fn empty_handed_is_not_an_error() {
        let result = registry()
            .execute(&call(serde_json::json!({"query": ""})))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.output, "nothing to repeat");
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments() {
        let registry = registry();
        let mut unknown = call(serde_json::json!({}));
        unknown.name = "page_fetch".into();
        assert!(matches!(
            registry.execute(&unknown).await.unwrap_err(),
            ToolError::NotFound(name) if name == "page_fetch"
        ));
        assert!(matches!(
            registry.execute(&call(serde_json::json!({}))).await.unwrap_err(),
            ToolError::InvalidArguments(_)
        ));
    }
}
