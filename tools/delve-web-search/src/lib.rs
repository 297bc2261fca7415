//! `search_web` tool backed by the Jina search endpoint.
//!
//! The endpoint takes a bearer API key (`JINA_API_KEY`) and returns a JSON
//! list of hits. Transient HTTP failures (429, 5xx, network errors) map to
//! [`ToolError::ExecutionFailed`] so the retry interceptor can try again.

use async_trait::async_trait;
use delve_core::tool::{Tool, ToolContext, ToolError, ToolResult};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

/// Default search endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://s.jina.ai/";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "JINA_API_KEY";

/// Request timeout (120 seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 120;

const DEFAULT_MAX_RESULTS: u64 = 5;
const MAX_RESULTS_LIMIT: u64 = 20;

/// Characters of page content kept per hit.
const SNIPPET_CHARS: usize = 1500;

/// Web search tool.
///
/// # Example
///
/// ```no_run
/// use delve_web_search::WebSearch;
/// use delve_core::tool::{Tool, ToolContext, ToolRegistry};
/// use delve_core::VirtualFs;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let search = WebSearch::from_env();
/// let ctx = ToolContext::new("run-1", Arc::new(ToolRegistry::new()), Arc::new(VirtualFs::new()));
/// let result = search.execute(json!({"query": "rust async runtimes"}), &ctx).await?;
/// println!("{}", result.content);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WebSearch {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    timeout: Duration,
}

impl fmt::Debug for WebSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSearch")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl WebSearch {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Read the API key from `JINA_API_KEY`.
    pub fn from_env() -> Self {
        Self::new(std::env::var(API_KEY_ENV).ok())
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

fn status_error(status: StatusCode, body: &str) -> ToolError {
    let detail = format!("Search returned {}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ToolError::ExecutionFailed(detail)
    } else {
        ToolError::Other(detail)
    }
}

/// Render the endpoint's JSON hits as numbered plain text.
fn format_results(body: &Value, max_results: usize) -> Result<(String, usize), ToolError> {
    let hits = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::ExecutionFailed("Search response has no 'data' array".into()))?;

    let mut out = String::new();
    let mut count = 0;
    for hit in hits.iter().take(max_results) {
        let field = |name: &str| hit.get(name).and_then(Value::as_str).unwrap_or_default();
        count += 1;
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&format!("[{}] {}\n{}", count, field("title"), field("url")));
        let description = field("description");
        if !description.is_empty() {
            out.push('\n');
            out.push_str(description);
        }
        let content = field("content");
        if !content.is_empty() {
            let snippet: String = content.chars().take(SNIPPET_CHARS).collect();
            out.push('\n');
            out.push_str(&snippet);
        }
    }

    if count == 0 {
        out = "No results found.".to_string();
    }
    Ok((out, count))
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "Search the web. Returns titles, URLs and page excerpts for the top hits. \
         Use focused queries; call it again with a refined query if results are thin."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of hits to return (default: 5, max: 20)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let query = input
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("Missing 'query' field".into()))?;
        if query.trim().is_empty() {
            return Err(ToolError::InvalidInput("Query cannot be empty".into()));
        }
        let max_results = input
            .get("max_results")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_LIMIT);

        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::Other(format!("{} is not set", API_KEY_ENV)))?;

        log::debug!("Searching the web for '{}'", query);
        let request = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .bearer_auth(api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .send();

        let response = tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => return Err(ToolError::Cancelled),
            response = request => response.map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    ToolError::ExecutionFailed(format!("Search request failed: {}", e))
                }
            })?,
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to read search response: {}", e)))?;
        if !status.is_success() {
            log::warn!("Search for '{}' failed with {}", query, status);
            return Err(status_error(status, &text));
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| ToolError::ExecutionFailed(format!("Invalid search response: {}", e)))?;
        let (content, count) = format_results(&body, max_results as usize)?;
        log::info!("Search for '{}' returned {} results", query, count);

        Ok(ToolResult::with_metadata(
            content,
            json!({ "query": query, "results": count }),
        ))
    }
}
