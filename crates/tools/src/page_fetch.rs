//! Page fetch tool: downloads one URL and returns its readable text.

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use pursuit_core::error::ToolError;
use pursuit_core::tool::{Tool, ToolResult};

const TOOL_NAME: &str = "page_fetch";

/// Tried in order; the first one present is the page's content.
const CONTENT_REGIONS: &[&str] = &["main", "article", "[role=main]", "body"];

/// Wide enough that html2text never wraps a paragraph.
const RENDER_WIDTH: usize = 400;

pub struct PageFetchTool {
    client: reqwest::Client,
    max_chars: usize,
}

impl PageFetchTool {
    pub fn new(max_chars: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("pursuit/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            max_chars: max_chars.max(1),
        }
    }
}

/// Readable text of an HTML document: the content region, rendered by
/// html2text with entities decoded and runs of blank lines collapsed.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let region = CONTENT_REGIONS
        .iter()
        .filter_map(|css| Selector::parse(css).ok())
        .find_map(|selector| document.select(&selector).next().map(|el| el.html()))
        .unwrap_or_else(|| html.to_string());

    let rendered = html2text::from_read(region.as_bytes(), RENDER_WIDTH);

    let mut lines: Vec<String> = Vec::new();
    for line in rendered.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() && lines.last().is_none_or(|prev| prev.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (text[..idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

#[async_trait]
impl Tool for PageFetchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Fetch a web page by URL and return its readable text."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http(s) URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let url = arguments["url"]
            .as_str()
            .map(str::trim)
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'url' argument".into()))?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArguments(
                "URL must start with http:// or https://".into(),
            ));
        }

        debug!(url = %url, "Fetching page");

        let response = self.client.get(url).send().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: TOOL_NAME.into(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::ExecutionFailed {
                tool_name: TOOL_NAME.into(),
                reason: format!("{url} returned {status}"),
            });
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));

        let body = response.text().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: TOOL_NAME.into(),
            reason: e.to_string(),
        })?;

        let text = if is_html { html_to_text(&body) } else { body.trim().to_string() };
        if text.is_empty() {
            return Ok(ToolResult::nothing(format!("{url} has no readable text"), vec![url.to_string()]));
        }

        let (mut output, truncated) = truncate_chars(&text, self.max_chars);
        if truncated {
            output.push_str("\n[truncated]");
        }

        Ok(ToolResult::found(output, vec![url.to_string()]))
    }
}
