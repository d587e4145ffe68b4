//! Capability tool: answers "what can you do?" without network access.

use async_trait::async_trait;
use serde_json::Value;

use pursuit_core::error::ToolError;
use pursuit_core::tool::{Tool, ToolResult};

pub struct CapabilitiesTool {
    tools: Vec<(String, String)>,
    corpus_summary: String,
}

impl CapabilitiesTool {
    /// `tools` are the `(name, description)` pairs of the other registered tools.
    pub fn new(tools: Vec<(String, String)>, corpus_summary: impl Into<String>) -> Self {
        Self {
            tools,
            corpus_summary: corpus_summary.into(),
        }
    }

    pub fn describe(&self) -> String {
        let mut out = String::from(
            "I answer multi-part questions by breaking them into parts and answering each one with cited evidence.\n",
        );
        if self.corpus_summary.is_empty() {
            out.push_str("Document search: no document collection is loaded.\n");
        } else {
            out.push_str(&format!("Document search: {}.\n", self.corpus_summary));
        }
        if !self.tools.is_empty() {
            out.push_str("Tools:\n");
            for (name, description) in &self.tools {
                out.push_str(&format!("- {name}: {description}\n"));
            }
        }
        out.push_str(
            "I keep track of anything left unanswered and follow up on it in later turns. \
             I do not look up individual patient or member records.",
        );
        out
    }
}

#[async_trait]
impl Tool for CapabilitiesTool {
    fn name(&self) -> &str {
        "capabilities"
    }

    fn description(&self) -> &str {
        "Describe what this assistant can do and which sources it can consult."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The capability question" }
            }
        })
    }

    async fn execute(&self, _arguments: Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::found(self.describe(), vec![]))
    }
}
