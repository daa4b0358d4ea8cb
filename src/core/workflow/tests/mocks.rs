//! Scripted doubles: an LLM that replays a fixed script and tools with
//! canned behavior, plus the rig that wires them into a real orchestrator
//! over an in-memory store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::core::events::WorkflowEvent;
use crate::core::llm::{ChatMessage, ContentDelta, DeltaStream, LlmClient, LlmHub};
use crate::core::orchestrator::{ChatStreamRequest, IncomingMessage, MessageContent, Orchestrator};
use crate::core::session::SessionStore;
use crate::core::tools::{Tool, ToolContext, ToolError, ToolRegistry};
use crate::core::workflow::engine::WorkflowEngine;

const DELTA_CHUNK_CHARS: usize = 4;

pub struct ScriptedResponse {
    pub text: String,
    pub delay: Option<Duration>,
}

impl ScriptedResponse {
    pub fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            delay: None,
        }
    }

    pub fn delayed(text: &str, delay: Duration) -> Self {
        Self {
            text: text.to_string(),
            delay: Some(delay),
        }
    }
}

/// Replays responses in order, regardless of which model class is asked:
/// node execution is strictly sequential, so the order is deterministic.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<ScriptedResponse>>,
}

impl ScriptedLlm {
    pub fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.iter().map(|r| ScriptedResponse::plain(r)).collect()),
        })
    }

    pub fn with_script(responses: Vec<ScriptedResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.into()),
        })
    }

    fn pop(&self) -> Result<ScriptedResponse> {
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .ok_or_else(|| anyhow!("LLM script exhausted"))
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String> {
        let response = self.pop()?;
        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(response.text)
    }

    async fn stream(&self, _messages: &[ChatMessage]) -> Result<DeltaStream> {
        let response = self.pop()?;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<ContentDelta>>();

        tokio::spawn(async move {
            if let Some(delay) = response.delay {
                tokio::time::sleep(delay).await;
            }
            let chars: Vec<char> = response.text.chars().collect();
            for chunk in chars.chunks(DELTA_CHUNK_CHARS) {
                let delta = ContentDelta {
                    content: Some(chunk.iter().collect()),
                    reasoning_content: None,
                };
                if tx.send(Ok(delta)).is_err() {
                    break;
                }
            }
        });

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

pub enum ToolBehavior {
    Succeed(String),
    FailNetwork(String),
}

pub fn succeed(out: &str) -> ToolBehavior {
    ToolBehavior::Succeed(out.to_string())
}

pub fn fail_network(msg: &str) -> ToolBehavior {
    ToolBehavior::FailNetwork(msg.to_string())
}

/// A tool double that records every invocation.
pub struct CannedTool {
    name: &'static str,
    behavior: ToolBehavior,
    pub calls: Mutex<Vec<Value>>,
}

impl CannedTool {
    pub fn new(name: &'static str, behavior: ToolBehavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl Tool for CannedTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "canned test tool"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        self.calls.lock().expect("calls lock").push(args);
        match &self.behavior {
            ToolBehavior::Succeed(out) => Ok(out.clone()),
            ToolBehavior::FailNetwork(msg) => Err(ToolError::Network(msg.clone())),
        }
    }
}

pub struct TestRig {
    pub store: Arc<SessionStore>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn rig_with_timeout(
    llm: Arc<ScriptedLlm>,
    tools: Vec<Arc<dyn Tool>>,
    timeout: Duration,
) -> TestRig {
    let hub = Arc::new(LlmHub::from_clients(llm.clone(), llm.clone(), llm));
    let registry = Arc::new(ToolRegistry::from_tools(tools));
    let browser_pool = registry.browser_pool();
    let engine = Arc::new(WorkflowEngine::new(hub, registry));
    let store = Arc::new(SessionStore::open_in_memory().expect("in-memory store"));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        engine,
        browser_pool,
        timeout,
    ));
    TestRig {
        store,
        orchestrator,
    }
}

pub fn rig(llm: Arc<ScriptedLlm>, tools: Vec<Arc<dyn Tool>>) -> TestRig {
    rig_with_timeout(llm, tools, Duration::from_secs(60))
}

pub fn request(text: &str, roster: &[&str]) -> ChatStreamRequest {
    ChatStreamRequest {
        messages: vec![IncomingMessage {
            role: "user".to_string(),
            content: MessageContent::Text(text.to_string()),
        }],
        debug: None,
        deep_thinking_mode: None,
        search_before_planning: None,
        team_members: Some(roster.iter().map(|r| r.to_string()).collect()),
        session_id: None,
    }
}

/// Drain the event channel until the run task drops its sender.
pub async fn collect_events(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<WorkflowEvent>,
) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn names(events: &[WorkflowEvent]) -> Vec<&'static str> {
    events.iter().map(WorkflowEvent::name).collect()
}

pub fn count(events: &[WorkflowEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}

/// Check the bracket invariants: `start_of_agent`/`end_of_agent` strictly
/// nested per agent id, `start_of_llm`/`end_of_llm` strictly nested, and no
/// `message` event outside an agent bracket.
pub fn assert_bracket_nesting(events: &[WorkflowEvent]) {
    let mut agent_stack: Vec<String> = Vec::new();
    let mut llm_open: Option<String> = None;

    for event in events {
        match event {
            WorkflowEvent::StartOfAgent { agent_id, .. } => {
                agent_stack.push(agent_id.clone());
            }
            WorkflowEvent::EndOfAgent { agent_id, .. } => {
                let open = agent_stack.pop().expect("end_of_agent without start");
                assert_eq!(&open, agent_id, "agent brackets interleaved");
            }
            WorkflowEvent::StartOfLlm { agent_name } => {
                assert!(llm_open.is_none(), "nested start_of_llm");
                assert!(!agent_stack.is_empty(), "start_of_llm outside agent");
                llm_open = Some(agent_name.clone());
            }
            WorkflowEvent::EndOfLlm { agent_name } => {
                let open = llm_open.take().expect("end_of_llm without start");
                assert_eq!(&open, agent_name, "llm brackets interleaved");
            }
            WorkflowEvent::Message { .. } => {
                assert!(!agent_stack.is_empty(), "message event outside agent bracket");
            }
            _ => {}
        }
    }
    assert!(agent_stack.is_empty(), "unclosed agent bracket");
    assert!(llm_open.is_none(), "unclosed llm bracket");
}

/// Concatenate the `content` deltas belonging to one message id.
pub fn reconstruct_message(events: &[WorkflowEvent], target_id: &str) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::Message { message_id, delta } if message_id == target_id => {
                delta["content"].as_str().map(str::to_string)
            }
            _ => None,
        })
        .collect()
}
