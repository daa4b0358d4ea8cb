//! Tavily web search.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{Tool, ToolContext, ToolError};
use crate::config::Config;

const TAVILY_URL: &str = "https://api.tavily.com/search";

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize, Serialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

pub struct WebSearchTool {
    api_key: String,
    max_results: usize,
    client: Client,
}

impl WebSearchTool {
    pub fn new(cfg: &Config) -> Self {
        Self {
            api_key: cfg.tavily_api_key.clone(),
            max_results: cfg.tavily_max_results,
            client: Client::new(),
        }
    }

    /// Direct entry point for the planner's search-before-planning pass,
    /// which runs outside a worker tool kit.
    pub async fn search(&self, query: &str) -> Result<String, ToolError> {
        if self.api_key.is_empty() {
            return Err(ToolError::Permanent(
                "TAVILY_API_KEY is not configured".to_string(),
            ));
        }

        debug!(query, "web search");
        let req = TavilyRequest {
            api_key: &self.api_key,
            query,
            max_results: self.max_results,
        };

        let res = self
            .client
            .post(TAVILY_URL)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout(format!("search request: {e}"))
                } else {
                    ToolError::Network(format!("search request: {e}"))
                }
            })?;

        if !res.status().is_success() {
            let status = res.status();
            return Err(if status.is_server_error() {
                ToolError::Network(format!("search API returned {status}"))
            } else {
                ToolError::Permanent(format!("search API returned {status}"))
            });
        }

        let parsed: TavilyResponse = res
            .json()
            .await
            .map_err(|e| ToolError::Network(format!("search response: {e}")))?;

        serde_json::to_string(&parsed.results)
            .map_err(|e| ToolError::Permanent(format!("serializing results: {e}")))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search the web. Returns a JSON list of {title, url, content} results."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query"}
            },
            "required": ["query"]
        })
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::Validation("missing required field: query".to_string()))?;
        self.search(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn tool() -> WebSearchTool {
        WebSearchTool {
            api_key: String::new(),
            max_results: 5,
            client: Client::new(),
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            tool_call_id: "wf_researcher_web_search_0".to_string(),
            run_id: "wf".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn missing_query_is_a_validation_error() {
        let out = tool().invoke(serde_json::json!({}), &ctx()).await;
        assert!(matches!(out, Err(ToolError::Validation(_))));
    }

    #[tokio::test]
    async fn blank_query_is_a_validation_error() {
        let out = tool()
            .invoke(serde_json::json!({"query": "   "}), &ctx())
            .await;
        assert!(matches!(out, Err(ToolError::Validation(_))));
    }

    #[tokio::test]
    async fn missing_api_key_is_permanent() {
        let out = tool()
            .invoke(serde_json::json!({"query": "aspirin"}), &ctx())
            .await;
        assert!(matches!(out, Err(ToolError::Permanent(_))));
    }
}
