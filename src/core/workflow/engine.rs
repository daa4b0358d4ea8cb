//! The state-graph interpreter.
//!
//! Runs one node at a time, applies its patch atomically, then follows its
//! `goto`. Edges are dynamic: START → coordinator, and from there each node
//! decides. Node-local failures terminate the run with an error message in
//! the state; cancellation aborts without touching the state at all.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::events::{self, EventTx, WorkflowEvent};
use crate::core::llm::{ChatMessage, LlmClass, LlmClient, LlmHub};
use crate::core::team::Worker;
use crate::core::tools::ToolRegistry;
use crate::core::workflow::state::{Goto, NodeCommand, StatePatch, WorkflowState};
use crate::core::workflow::{nodes, react};

/// Hard ceiling on node executions per run; a supervisor loop cannot spin
/// forever even if the model keeps dispatching.
const MAX_STEPS: u64 = 40;

/// Why a run stopped before reaching a terminal node.
#[derive(Debug)]
pub enum RunInterrupt {
    Cancelled,
}

/// Per-run bookkeeping shared by the engine and its nodes.
pub struct RunContext {
    pub workflow_id: String,
    pub events: EventTx,
    pub cancel: CancellationToken,
    pub step: u64,
    pub tool_seq: u64,
    /// Set once the planner is entered; gates the workflow envelope events.
    pub workflow_triggered: bool,
}

impl RunContext {
    pub fn new(workflow_id: String, events: EventTx, cancel: CancellationToken) -> Self {
        Self {
            workflow_id,
            events,
            cancel,
            step: 0,
            tool_seq: 0,
            workflow_triggered: false,
        }
    }

    pub fn emit(&self, event: WorkflowEvent) {
        // A dropped receiver means the client is gone; cancellation follows
        // from the transport, not from here.
        let _ = self.events.send(event);
    }

    pub fn next_tool_call_id(&mut self, worker: Worker, tool: &str) -> String {
        let id = events::tool_call_id(&self.workflow_id, worker.as_str(), tool, self.tool_seq);
        self.tool_seq += 1;
        id
    }
}

pub struct WorkflowEngine {
    llm: Arc<LlmHub>,
    tools: Arc<ToolRegistry>,
}

impl WorkflowEngine {
    pub fn new(llm: Arc<LlmHub>, tools: Arc<ToolRegistry>) -> Self {
        Self { llm, tools }
    }

    pub fn llm(&self) -> &Arc<LlmHub> {
        &self.llm
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Drive the graph to termination. `Ok` covers both success and
    /// failure-with-error-message; `Err(Cancelled)` means the state must not
    /// be persisted.
    pub async fn run(
        &self,
        state: &mut WorkflowState,
        ctx: &mut RunContext,
    ) -> Result<(), RunInterrupt> {
        let mut current = Worker::Coordinator;

        loop {
            if ctx.cancel.is_cancelled() {
                info!(workflow_id = %ctx.workflow_id, "Run cancelled before {current}");
                return Err(RunInterrupt::Cancelled);
            }
            ctx.step += 1;
            if ctx.step > MAX_STEPS {
                error!(workflow_id = %ctx.workflow_id, "Run exceeded {MAX_STEPS} steps");
                state.apply(StatePatch::default().message(ChatMessage::assistant(
                    "The workflow could not be completed: too many steps.",
                )));
                return Ok(());
            }

            if current == Worker::Planner && !ctx.workflow_triggered {
                ctx.workflow_triggered = true;
                ctx.emit(WorkflowEvent::StartOfWorkflow {
                    workflow_id: ctx.workflow_id.clone(),
                    input: state.input.clone(),
                });
            }

            // The supervisor is plumbing, not a surfaced worker: its node
            // execution is filtered out of the projected stream.
            let project = should_project(current);
            let agent_id = events::agent_id(&ctx.workflow_id, current.as_str(), ctx.step);
            if project {
                ctx.emit(WorkflowEvent::StartOfAgent {
                    agent_name: current.as_str().to_string(),
                    agent_id: agent_id.clone(),
                });
            }
            info!(workflow_id = %ctx.workflow_id, step = ctx.step, "Running node {current}");

            let command = match self.run_node(current, state, ctx).await {
                Ok(command) => command,
                Err(_) if ctx.cancel.is_cancelled() => {
                    info!(workflow_id = %ctx.workflow_id, "Run cancelled inside {current}");
                    return Err(RunInterrupt::Cancelled);
                }
                Err(e) => {
                    warn!(workflow_id = %ctx.workflow_id, "Node {current} failed: {e:#}");
                    NodeCommand::end(StatePatch::default().message(ChatMessage::assistant(
                        format!("The workflow could not be completed: {e}"),
                    )))
                }
            };

            state.apply(command.patch);
            if project {
                ctx.emit(WorkflowEvent::EndOfAgent {
                    agent_name: current.as_str().to_string(),
                    agent_id,
                });
            }

            match command.goto {
                Goto::End => return Ok(()),
                Goto::Worker(next) => {
                    if Worker::dispatchable().contains(&next) && !state.roster_contains(next) {
                        // Nodes validate their own routing; reaching this is
                        // an internal invariant violation.
                        error!(
                            workflow_id = %ctx.workflow_id,
                            "Routing to {next} outside the roster"
                        );
                        state.apply(StatePatch::default().message(ChatMessage::assistant(
                            format!("The workflow could not be completed: {next} is not part of this run's team."),
                        )));
                        return Ok(());
                    }
                    current = next;
                }
            }
        }
    }

    async fn run_node(
        &self,
        worker: Worker,
        state: &WorkflowState,
        ctx: &mut RunContext,
    ) -> Result<NodeCommand> {
        match worker {
            Worker::Coordinator => nodes::coordinator(self, state, ctx).await,
            Worker::Planner => nodes::planner(self, state, ctx).await,
            Worker::Supervisor => nodes::supervisor(self, state, ctx).await,
            Worker::Researcher
            | Worker::Coder
            | Worker::Browser
            | Worker::Reporter
            | Worker::Translator => react::run_worker(self, worker, state, ctx).await,
        }
    }

    /// Stream one LLM call, projecting `start_of_llm`, per-delta `message`
    /// and `end_of_llm` events. Returns the concatenated content.
    pub(crate) async fn stream_llm(
        &self,
        worker: Worker,
        class: LlmClass,
        messages: &[ChatMessage],
        ctx: &RunContext,
    ) -> Result<String> {
        let client = self.llm.client_for(class);
        ctx.emit(WorkflowEvent::StartOfLlm {
            agent_name: worker.as_str().to_string(),
        });

        let result = self.pump_stream(client, messages, ctx, None).await;

        ctx.emit(WorkflowEvent::EndOfLlm {
            agent_name: worker.as_str().to_string(),
        });
        result
    }

    /// Like [`stream_llm`], but gated for the coordinator: the first few
    /// deltas are buffered and, if they spell the handoff marker, the whole
    /// call stays silent on the message channel.
    pub(crate) async fn stream_llm_gated(
        &self,
        worker: Worker,
        class: LlmClass,
        messages: &[ChatMessage],
        ctx: &RunContext,
    ) -> Result<String> {
        let client = self.llm.client_for(class);
        ctx.emit(WorkflowEvent::StartOfLlm {
            agent_name: worker.as_str().to_string(),
        });

        let result = self
            .pump_stream(client, messages, ctx, Some(HandoffGate::new()))
            .await;

        ctx.emit(WorkflowEvent::EndOfLlm {
            agent_name: worker.as_str().to_string(),
        });
        result
    }

    async fn pump_stream(
        &self,
        client: Arc<dyn LlmClient>,
        messages: &[ChatMessage],
        ctx: &RunContext,
        mut gate: Option<HandoffGate>,
    ) -> Result<String> {
        let mut stream = client.stream(messages).await?;
        let message_id = uuid::Uuid::new_v4().to_string();
        let mut full = String::new();

        loop {
            let next = tokio::select! {
                _ = ctx.cancel.cancelled() => bail!("cancelled"),
                next = stream.next() => next,
            };
            let delta = match next {
                Some(Ok(delta)) => delta,
                Some(Err(e)) => return Err(anyhow!("LLM stream failed: {e}")),
                None => break,
            };
            if delta.is_empty() {
                continue;
            }
            if let Some(content) = &delta.content {
                full.push_str(content);
            }

            let emit = match &mut gate {
                Some(g) => g.admit(&delta),
                None => Some(serde_json::to_value(&delta)?),
            };
            if let Some(payload) = emit {
                ctx.emit(WorkflowEvent::Message {
                    message_id: message_id.clone(),
                    delta: payload,
                });
            }
        }

        // A short non-handoff reply may end while still buffered.
        if let Some(g) = gate
            && let Some(payload) = g.flush()
        {
            ctx.emit(WorkflowEvent::Message {
                message_id,
                delta: payload,
            });
        }

        Ok(full)
    }
}

/// Agent brackets are projected for roster workers, the planner and the
/// coordinator; the supervisor stays off the wire.
fn should_project(worker: Worker) -> bool {
    !matches!(worker, Worker::Supervisor)
}

/// Buffers the coordinator's leading deltas so the `handoff_to_planner`
/// marker never leaks to the client as message events.
const GATE_CACHE_SIZE: usize = 3;

struct HandoffGate {
    cache: Vec<String>,
    open: bool,
    handoff: bool,
}

impl HandoffGate {
    fn new() -> Self {
        Self {
            cache: Vec::new(),
            open: false,
            handoff: false,
        }
    }

    /// Decide whether a delta may be emitted; returns the payload to send.
    fn admit(&mut self, delta: &crate::core::llm::ContentDelta) -> Option<serde_json::Value> {
        if self.handoff {
            return None;
        }
        if self.open {
            return serde_json::to_value(delta).ok();
        }

        // Reasoning deltas pass through untouched; the gate watches content.
        let Some(content) = &delta.content else {
            return serde_json::to_value(delta).ok();
        };

        self.cache.push(content.clone());
        let joined = self.cache.concat();
        if joined.starts_with("handoff") {
            self.handoff = true;
            return None;
        }
        if self.cache.len() < GATE_CACHE_SIZE {
            return None;
        }
        self.open = true;
        self.cache.clear();
        Some(serde_json::json!({ "content": joined }))
    }

    fn flush(self) -> Option<serde_json::Value> {
        if self.handoff || self.open || self.cache.is_empty() {
            return None;
        }
        Some(serde_json::json!({ "content": self.cache.concat() }))
    }
}
