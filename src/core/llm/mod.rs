pub mod openai;
pub mod structured;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::core::team::Worker;

/// One chat turn as handed to a model. `name` tags messages produced by a
/// worker so later nodes (and the persisted snapshot) know who said what.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// The three model classes the engine selects between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmClass {
    Basic,
    Reasoning,
    Vision,
}

/// A single streamed token group. Reasoning models interleave
/// `reasoning_content` with the regular `content` channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContentDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl ContentDelta {
    pub fn is_empty(&self) -> bool {
        self.content.as_deref().unwrap_or("").is_empty()
            && self.reasoning_content.as_deref().unwrap_or("").is_empty()
    }
}

pub type DeltaStream = BoxStream<'static, Result<ContentDelta>>;

/// Uniform call surface over a chat model: one-shot and token streaming.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Lazy, finite sequence of deltas; concatenating the `content` fields
    /// reconstructs the full completion.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<DeltaStream>;
}

/// Per-class client selection.
///
/// Policy: reasoning when the run has deep thinking enabled, vision only for
/// the browser worker, basic everywhere else.
pub struct LlmHub {
    basic: Arc<dyn LlmClient>,
    reasoning: Arc<dyn LlmClient>,
    vision: Arc<dyn LlmClient>,
}

impl LlmHub {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            basic: Arc::new(openai::OpenAiCompatClient::new(cfg.basic.clone())),
            reasoning: Arc::new(openai::OpenAiCompatClient::new(cfg.reasoning.clone())),
            vision: Arc::new(openai::OpenAiCompatClient::new(cfg.vision.clone())),
        }
    }

    /// Build a hub from explicit clients; the test doubles come in this way.
    #[allow(dead_code)]
    pub fn from_clients(
        basic: Arc<dyn LlmClient>,
        reasoning: Arc<dyn LlmClient>,
        vision: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            basic,
            reasoning,
            vision,
        }
    }

    pub fn client_for(&self, class: LlmClass) -> Arc<dyn LlmClient> {
        match class {
            LlmClass::Basic => self.basic.clone(),
            LlmClass::Reasoning => self.reasoning.clone(),
            LlmClass::Vision => self.vision.clone(),
        }
    }

    pub fn class_for_worker(worker: Worker, deep_thinking: bool) -> LlmClass {
        // Dispatchable workers carry their default class in the registry.
        if let Some(info) = crate::core::team::member_info(worker) {
            return info.llm_class;
        }
        match worker {
            Worker::Planner if deep_thinking => LlmClass::Reasoning,
            _ => LlmClass::Basic,
        }
    }
}
