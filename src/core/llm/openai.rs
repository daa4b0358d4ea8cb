//! OpenAI-compatible chat-completions client, non-streaming and SSE streaming.
//!
//! All three model classes speak this protocol; the endpoints differ only in
//! base URL, key and model id.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use super::{ChatMessage, ContentDelta, DeltaStream, LlmClient};
use crate::config::LlmEndpoint;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
}

pub struct OpenAiCompatClient {
    endpoint: LlmEndpoint,
    client: Client,
}

impl OpenAiCompatClient {
    pub fn new(endpoint: LlmEndpoint) -> Self {
        Self {
            endpoint,
            client: Client::new(),
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.endpoint.base_url.trim_end_matches('/')
        )
    }

    fn wire_messages<'a>(messages: &'a [ChatMessage]) -> Vec<WireMessage<'a>> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect()
    }
}

/// Pull complete `data: {...}` SSE payloads out of the line buffer.
/// Returns `None` once the `[DONE]` terminator is seen.
fn parse_sse_line(line: &str) -> Option<Option<StreamChunk>> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        return Some(None);
    }
    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => Some(Some(chunk)),
        Err(e) => {
            warn!("Skipping malformed stream chunk: {e}");
            None
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn model_id(&self) -> &str {
        &self.endpoint.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let req = ChatRequest {
            model: &self.endpoint.model,
            messages: Self::wire_messages(messages),
            stream: false,
        };

        let res = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.endpoint.api_key)
            .json(&req)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("LLM API error ({status}): {body}"));
        }

        let parsed: ChatResponse = res.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("LLM response contained no choices"))
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<DeltaStream> {
        let req = ChatRequest {
            model: &self.endpoint.model,
            messages: Self::wire_messages(messages),
            stream: true,
        };

        let res = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.endpoint.api_key)
            .json(&req)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("LLM API error ({status}): {body}"));
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<ContentDelta>>();

        tokio::spawn(async move {
            let mut body = res.bytes_stream();
            let mut buffer = String::new();

            'read: while let Some(next) = body.next().await {
                let bytes = match next {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(anyhow!("LLM stream read failed: {e}")));
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    match parse_sse_line(&line) {
                        Some(Some(chunk)) => {
                            if let Some(choice) = chunk.choices.into_iter().next() {
                                let delta = ContentDelta {
                                    content: choice.delta.content,
                                    reasoning_content: choice.delta.reasoning_content,
                                };
                                if !delta.is_empty() && tx.send(Ok(delta)).is_err() {
                                    // Receiver dropped: the run was cancelled.
                                    debug!("LLM delta receiver gone, aborting stream");
                                    break 'read;
                                }
                            }
                        }
                        Some(None) => break 'read,
                        None => {}
                    }
                }
            }
        });

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
