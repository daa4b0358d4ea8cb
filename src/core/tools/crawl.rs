//! URL crawl: fetch a page and reduce it to readable text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{Tool, ToolContext, ToolError};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESULT_CHARS: usize = 12_000;
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/120.0 Safari/537.36";

pub struct CrawlTool {
    client: Client,
}

impl CrawlTool {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(FETCH_TIMEOUT)
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn validate_url(url: &str) -> Result<(), ToolError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolError::Validation(format!(
                "url must be http(s), got: {url}"
            )));
        }
        Ok(())
    }
}

/// Convert fetched HTML into plain text, truncated for the model.
fn readable_text(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), 120);
    if text.chars().count() > MAX_RESULT_CHARS {
        let truncated: String = text.chars().take(MAX_RESULT_CHARS).collect();
        format!("{truncated}\n...[truncated]")
    } else {
        text
    }
}

#[async_trait]
impl Tool for CrawlTool {
    fn name(&self) -> &'static str {
        "crawl"
    }

    fn description(&self) -> &'static str {
        "Fetch a URL and return its readable text content."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The http(s) URL to fetch"}
            },
            "required": ["url"]
        })
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ToolError::Validation("missing required field: url".to_string()))?;
        Self::validate_url(url)?;

        debug!(url, "crawl fetch");
        let response = tokio::select! {
            res = self.client.get(url).send() => res.map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout(format!("fetching {url}: {e}"))
                } else {
                    ToolError::Network(format!("fetching {url}: {e}"))
                }
            })?,
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::Permanent("cancelled".to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(if status.is_server_error() {
                ToolError::Network(format!("{url} returned {status}"))
            } else {
                ToolError::Permanent(format!("{url} returned {status}"))
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Network(format!("reading {url}: {e}")))?;
        Ok(readable_text(&body))
    }
}
