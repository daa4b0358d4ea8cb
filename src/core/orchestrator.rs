//! Request orchestration: one incoming turn becomes one engine run.
//!
//! Resolves the session, stores the user turn, emits `session_id` before any
//! work, drives the engine in its own task, and on normal termination
//! persists the produced messages and the state snapshot. A cancelled run
//! persists nothing beyond the already-stored user turn.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::events::{self, EventRx, WorkflowEvent};
use crate::core::llm::ChatMessage;
use crate::core::session::{MessageKind, MessageRole, SessionStore};
use crate::core::team::{self, Worker};
use crate::core::tools::browser::BrowserPool;
use crate::core::workflow::engine::{RunContext, RunInterrupt, WorkflowEngine};
use crate::core::workflow::state::{Plan, WorkflowState};

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Body of `POST /api/chat/stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamRequest {
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub deep_thinking_mode: Option<bool>,
    #[serde(default)]
    pub search_before_planning: Option<bool>,
    #[serde(default)]
    pub team_members: Option<Vec<String>>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: MessageContent,
}

/// Either a plain string or a list of typed parts (text / image).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl MessageContent {
    /// Flatten to the text the engine works with. Image parts are carried in
    /// the stored turn but are invisible to non-vision workers.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|p| p.kind == "text")
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    fn stored_form(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => {
                serde_json::to_string(parts).unwrap_or_else(|_| self.as_text())
            }
        }
    }
}

/// Everything the transport needs to serve one started turn.
pub struct TurnHandle {
    pub session_id: String,
    pub events: EventRx,
    pub cancel: CancellationToken,
}

pub struct Orchestrator {
    store: Arc<SessionStore>,
    engine: Arc<WorkflowEngine>,
    browser_pool: Arc<BrowserPool>,
    active_runs: Arc<Mutex<HashSet<String>>>,
    workflow_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        engine: Arc<WorkflowEngine>,
        browser_pool: Arc<BrowserPool>,
        workflow_timeout: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            browser_pool,
            active_runs: Arc::new(Mutex::new(HashSet::new())),
            workflow_timeout,
        }
    }

    /// Validate the turn, persist the user message, and start the run.
    pub async fn start_turn(&self, request: ChatStreamRequest) -> Result<TurnHandle, TurnError> {
        if request.messages.is_empty() {
            return Err(TurnError::BadRequest("messages must not be empty".into()));
        }
        for message in &request.messages {
            if !matches!(message.role.as_str(), "user" | "assistant") {
                return Err(TurnError::BadRequest(format!(
                    "unsupported message role: {}",
                    message.role
                )));
            }
        }
        let Some(user_turn) = request.messages.iter().rev().find(|m| m.role == "user") else {
            return Err(TurnError::BadRequest(
                "the turn must contain a user message".into(),
            ));
        };

        let roster = request
            .team_members
            .clone()
            .unwrap_or_else(team::default_roster);
        team::validate_roster(&roster).map_err(|e| TurnError::BadRequest(e.to_string()))?;

        let session = match &request.session_id {
            Some(id) => self
                .store
                .get_session(id)
                .await?
                .ok_or_else(|| TurnError::NotFound(format!("session {id} not found")))?,
            None => self.store.create_session(None).await?,
        };

        let run_guard = RunGuard::acquire(self.active_runs.clone(), &session.id)
            .ok_or_else(|| {
                TurnError::BadRequest(format!(
                    "a run is already active for session {}",
                    session.id
                ))
            })?;

        self.store
            .add_message(
                &session.id,
                MessageRole::User,
                MessageKind::Text,
                &user_turn.content.stored_form(),
            )
            .await?;

        let mut state = WorkflowState::new(
            session.id.clone(),
            roster,
            request.deep_thinking_mode.unwrap_or(false),
            request.search_before_planning.unwrap_or(false),
        );
        for message in &request.messages {
            state.messages.push(ChatMessage {
                role: message.role.clone(),
                content: message.content.as_text(),
                name: None,
            });
        }
        state.initial_len = state.messages.len();
        state.input = request
            .messages
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect();

        let workflow_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = events::channel();
        let cancel = CancellationToken::new();
        let mut ctx = RunContext::new(workflow_id.clone(), tx, cancel.clone());

        // First thing on the wire, so a reload can recover the session even
        // if the connection dies mid-run.
        ctx.emit(WorkflowEvent::SessionId {
            session_id: session.id.clone(),
        });

        if request.debug.unwrap_or(false) {
            crate::logging::enable_debug_logging();
            debug!(workflow_id = %workflow_id, "Debug-flagged run: {request:?}");
        }
        info!(
            workflow_id = %workflow_id,
            session_id = %session.id,
            "Starting workflow run"
        );

        let store = self.store.clone();
        let engine = self.engine.clone();
        let browser_pool = self.browser_pool.clone();
        let timeout = self.workflow_timeout;
        let run_cancel = cancel.clone();

        tokio::spawn(async move {
            let _guard = run_guard;
            let wf_id = workflow_id.clone();

            let outcome = tokio::select! {
                outcome = engine.run(&mut state, &mut ctx) => outcome,
                _ = tokio::time::sleep(timeout) => {
                    warn!(workflow_id = %wf_id, "Run cancelled: timeout");
                    run_cancel.cancel();
                    Err(RunInterrupt::Cancelled)
                }
            };

            match outcome {
                Ok(()) => {
                    if ctx.workflow_triggered {
                        ctx.emit(WorkflowEvent::EndOfWorkflow {
                            workflow_id: ctx.workflow_id.clone(),
                            messages: state.message_values(),
                        });
                    }
                    ctx.emit(WorkflowEvent::FinalSessionState {
                        messages: state.message_values(),
                    });
                    if let Err(e) = persist_outcome(&store, &state).await {
                        error!(workflow_id = %ctx.workflow_id, "Persisting run outcome failed: {e:#}");
                    }
                }
                Err(RunInterrupt::Cancelled) => {
                    info!(
                        workflow_id = %ctx.workflow_id,
                        "Run cancelled; session state left untouched"
                    );
                }
            }

            // Cancellation or not, any browser session this run held dies here.
            browser_pool.terminate_run(&ctx.workflow_id);
        });

        Ok(TurnHandle {
            session_id: session.id,
            events: rx,
            cancel,
        })
    }
}

/// Write the run's produced messages and snapshot into the session.
async fn persist_outcome(store: &SessionStore, state: &WorkflowState) -> Result<()> {
    for message in state.produced_messages() {
        match message.name.as_deref() {
            Some("planner") => {
                let envelope = plan_envelope(state.full_plan.as_deref(), &message.content);
                store
                    .add_message(
                        &state.session_id,
                        MessageRole::System,
                        MessageKind::Workflow,
                        &envelope.to_string(),
                    )
                    .await?;
            }
            Some(name @ ("researcher" | "coder" | "browser" | "translator")) => {
                let envelope = serde_json::json!({
                    "workflow": {
                        "id": format!("workflow-{name}-{}", short_id()),
                        "agent": name,
                        "result": message.content,
                    }
                });
                store
                    .add_message(
                        &state.session_id,
                        MessageRole::System,
                        MessageKind::Workflow,
                        &envelope.to_string(),
                    )
                    .await?;
            }
            _ if message.role == "assistant" => {
                store
                    .add_message(
                        &state.session_id,
                        MessageRole::Assistant,
                        MessageKind::Text,
                        &message.content,
                    )
                    .await?;
            }
            _ => {}
        }
    }

    store.update_state(&state.session_id, &state.snapshot()).await
}

/// The plan message as the client expects it: a `workflow` envelope carrying
/// the parsed plan, or the raw text when parsing is impossible.
fn plan_envelope(full_plan: Option<&str>, fallback: &str) -> Value {
    let plan_value = full_plan
        .and_then(|p| serde_json::from_str::<Plan>(p).ok())
        .map(|p| serde_json::to_value(&p).unwrap_or(Value::Null));

    let name = plan_value
        .as_ref()
        .and_then(|p| p["title"].as_str())
        .unwrap_or("Execution plan")
        .to_string();

    serde_json::json!({
        "workflow": {
            "id": format!("workflow-planner-{}", short_id()),
            "name": name,
            "agent": Worker::Planner.as_str(),
            "plan": plan_value.unwrap_or_else(|| Value::String(fallback.to_string())),
        }
    })
}

fn short_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

/// Membership in the active-run set; dropping the guard frees the session.
struct RunGuard {
    runs: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl RunGuard {
    fn acquire(runs: Arc<Mutex<HashSet<String>>>, session_id: &str) -> Option<Self> {
        let inserted = runs
            .lock()
            .expect("active runs lock")
            .insert(session_id.to_string());
        inserted.then(|| Self {
            runs,
            session_id: session_id.to_string(),
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runs
            .lock()
            .expect("active runs lock")
            .remove(&self.session_id);
    }
}
