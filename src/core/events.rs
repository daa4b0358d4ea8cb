//! The closed event set streamed to the client, and the id discipline that
//! ties events to their run.
//!
//! The engine is the only producer for a run; the transport is the only
//! consumer. The channel is an ordinary unbounded mpsc, so delivery order is
//! engine-observed order.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WorkflowEvent {
    SessionId {
        session_id: String,
    },
    StartOfWorkflow {
        workflow_id: String,
        input: Vec<Value>,
    },
    StartOfAgent {
        agent_name: String,
        agent_id: String,
    },
    EndOfAgent {
        agent_name: String,
        agent_id: String,
    },
    StartOfLlm {
        agent_name: String,
    },
    EndOfLlm {
        agent_name: String,
    },
    Message {
        message_id: String,
        delta: Value,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        tool_input: Value,
    },
    ToolCallResult {
        tool_call_id: String,
        tool_name: String,
        tool_result: String,
    },
    EndOfWorkflow {
        workflow_id: String,
        messages: Vec<Value>,
    },
    FinalSessionState {
        messages: Vec<Value>,
    },
}

impl WorkflowEvent {
    /// Wire name used in the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::SessionId { .. } => "session_id",
            WorkflowEvent::StartOfWorkflow { .. } => "start_of_workflow",
            WorkflowEvent::StartOfAgent { .. } => "start_of_agent",
            WorkflowEvent::EndOfAgent { .. } => "end_of_agent",
            WorkflowEvent::StartOfLlm { .. } => "start_of_llm",
            WorkflowEvent::EndOfLlm { .. } => "end_of_llm",
            WorkflowEvent::Message { .. } => "message",
            WorkflowEvent::ToolCall { .. } => "tool_call",
            WorkflowEvent::ToolCallResult { .. } => "tool_call_result",
            WorkflowEvent::EndOfWorkflow { .. } => "end_of_workflow",
            WorkflowEvent::FinalSessionState { .. } => "final_session_state",
        }
    }

    /// The `data:` payload, compact JSON.
    pub fn payload(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut obj)) => obj.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

pub type EventTx = mpsc::UnboundedSender<WorkflowEvent>;
pub type EventRx = mpsc::UnboundedReceiver<WorkflowEvent>;

pub fn channel() -> (EventTx, EventRx) {
    mpsc::unbounded_channel()
}

/// `{workflow_id}_{worker}_{step}`
pub fn agent_id(workflow_id: &str, worker: &str, step: u64) -> String {
    format!("{workflow_id}_{worker}_{step}")
}

/// `{workflow_id}_{worker}_{tool}_{run-local counter}`
pub fn tool_call_id(workflow_id: &str, worker: &str, tool: &str, seq: u64) -> String {
    format!("{workflow_id}_{worker}_{tool}_{seq}")
}
