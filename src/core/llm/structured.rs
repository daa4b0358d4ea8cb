//! Schema-coerced LLM invocation.
//!
//! Callers that need machine-readable output (the supervisor's routing
//! decision, the planner's plan) go through here instead of trusting the raw
//! completion: the JSON block is extracted, fences are stripped, and a single
//! corrective retry is attempted before the call fails.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::de::DeserializeOwned;
use tracing::warn;

use super::{ChatMessage, LlmClient};

/// Extract a JSON block from LLM output. Tries fenced ```json ... ``` first,
/// then raw JSON starting with `{` or `[`.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let content_start = start + 7;
        if let Some(end) = trimmed[content_start..].find("```") {
            let block = trimmed[content_start..content_start + end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }
    if let Some(start) = trimmed.find("```") {
        let content_start = start + 3;
        if let Some(end) = trimmed[content_start..].find("```") {
            let block = trimmed[content_start..content_start + end].trim();
            if block.starts_with('{') || block.starts_with('[') {
                return Some(block);
            }
        }
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(trimmed);
    }
    None
}

/// Parse a typed value out of raw LLM output.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T> {
    let block =
        extract_json_block(text).ok_or_else(|| anyhow!("no JSON object found in output"))?;
    serde_json::from_str::<T>(block).map_err(|e| anyhow!("output does not match schema: {e}"))
}

/// Invoke the model and coerce its output into `T`. On a malformed first
/// attempt the model is shown its own output plus the parse error and asked
/// once more; a second failure surfaces as a schema violation.
pub async fn coerce<T: DeserializeOwned>(
    client: &Arc<dyn LlmClient>,
    messages: &[ChatMessage],
) -> Result<T> {
    let first = client.generate(messages).await?;
    let first_err = match parse_structured::<T>(&first) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    warn!("Structured output malformed, retrying once: {first_err}");

    let mut retry_messages = messages.to_vec();
    retry_messages.push(ChatMessage::assistant(first));
    retry_messages.push(ChatMessage::system(format!(
        "Your previous reply was not valid for the required schema ({first_err}). \
         Respond again with ONLY the JSON object, no prose and no code fences."
    )));

    let second = client.generate(&retry_messages).await?;
    parse_structured::<T>(&second)
        .map_err(|e| anyhow!("structured output failed schema coercion after retry: {e}"))
}
