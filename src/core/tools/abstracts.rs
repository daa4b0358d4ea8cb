//! Medical literature abstract lookup via the PubMed E-utilities.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{Tool, ToolContext, ToolError};

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RESULTS: usize = 5;
const MAX_RESULT_CHARS: usize = 16_000;

#[derive(Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Deserialize)]
struct ESearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

pub struct AbstractSearchTool {
    client: Client,
}

impl AbstractSearchTool {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn map_reqwest(e: reqwest::Error, what: &str) -> ToolError {
        if e.is_timeout() {
            ToolError::Timeout(format!("{what}: {e}"))
        } else {
            ToolError::Network(format!("{what}: {e}"))
        }
    }
}

fn clamp(text: String) -> String {
    if text.chars().count() > MAX_RESULT_CHARS {
        let truncated: String = text.chars().take(MAX_RESULT_CHARS).collect();
        format!("{truncated}\n...[truncated]")
    } else {
        text
    }
}

#[async_trait]
impl Tool for AbstractSearchTool {
    fn name(&self) -> &'static str {
        "abstract_search"
    }

    fn description(&self) -> &'static str {
        "Search PubMed and return the abstracts of the top matching articles."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "PubMed search terms"},
                "max_results": {"type": "integer", "description": "How many abstracts, default 5"}
            },
            "required": ["query"]
        })
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::Validation("missing required field: query".to_string()))?;
        let max_results = args
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, 20);

        debug!(query, max_results, "pubmed abstract search");

        let retmax = max_results.to_string();
        let search = self
            .client
            .get(ESEARCH_URL)
            .query(&[
                ("db", "pubmed"),
                ("term", query),
                ("retmax", retmax.as_str()),
                ("retmode", "json"),
                ("sort", "relevance"),
            ])
            .send()
            .await
            .map_err(|e| Self::map_reqwest(e, "pubmed search"))?
            .error_for_status()
            .map_err(|e| ToolError::Network(format!("pubmed search: {e}")))?;

        let parsed: ESearchResponse = search
            .json()
            .await
            .map_err(|e| ToolError::Network(format!("pubmed search response: {e}")))?;

        if parsed.esearchresult.idlist.is_empty() {
            return Ok(format!("No PubMed results for: {query}"));
        }

        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Permanent("cancelled".to_string()));
        }

        let ids = parsed.esearchresult.idlist.join(",");
        let abstracts = self
            .client
            .get(EFETCH_URL)
            .query(&[
                ("db", "pubmed"),
                ("id", ids.as_str()),
                ("rettype", "abstract"),
                ("retmode", "text"),
            ])
            .send()
            .await
            .map_err(|e| Self::map_reqwest(e, "pubmed fetch"))?
            .error_for_status()
            .map_err(|e| ToolError::Network(format!("pubmed fetch: {e}")))?
            .text()
            .await
            .map_err(|e| ToolError::Network(format!("pubmed fetch body: {e}")))?;

        Ok(clamp(abstracts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn missing_query_is_a_validation_error() {
        let tool = AbstractSearchTool::new();
        let ctx = ToolContext {
            tool_call_id: "wf_researcher_abstract_search_0".to_string(),
            run_id: "wf".to_string(),
            cancel: CancellationToken::new(),
        };
        let out = tool.invoke(serde_json::json!({}), &ctx).await;
        assert!(matches!(out, Err(ToolError::Validation(_))));
    }

    #[test]
    fn clamp_truncates_oversized_output() {
        let out = clamp("x".repeat(MAX_RESULT_CHARS * 2));
        assert!(out.ends_with("...[truncated]"));
    }

    #[test]
    fn esearch_response_parses_id_list() {
        let raw = r#"{"esearchresult": {"idlist": ["123", "456"]}}"#;
        let parsed: ESearchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.esearchresult.idlist, vec!["123", "456"]);
    }
}
