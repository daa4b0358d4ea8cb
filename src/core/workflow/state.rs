//! Typed workflow state and the node command that patches it.
//!
//! The state lives only for one run; its final form is snapshotted into the
//! session. Nodes never mutate it directly: they return a [`StatePatch`] the
//! engine applies atomically before consulting `goto`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::llm::ChatMessage;
use crate::core::team::Worker;

/// Terminal sentinel written into the `next` routing field.
pub const FINISH: &str = "FINISH";

#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub session_id: String,
    /// Dispatchable workers active for this run.
    pub team_members: Vec<String>,
    pub deep_thinking_mode: bool,
    pub search_before_planning: bool,
    /// The user turn plus each worker's produced message, in order.
    pub messages: Vec<ChatMessage>,
    /// Scalar routing field; mirrors the supervisor's latest decision.
    pub next: String,
    /// The planner's most recent full plan.
    pub full_plan: Option<String>,
    /// The raw client input, echoed in `start_of_workflow`.
    pub input: Vec<Value>,
    /// Messages present before the run started; everything past this index
    /// was produced by this run.
    pub initial_len: usize,
}

impl WorkflowState {
    pub fn new(
        session_id: String,
        team_members: Vec<String>,
        deep_thinking_mode: bool,
        search_before_planning: bool,
    ) -> Self {
        Self {
            session_id,
            team_members,
            deep_thinking_mode,
            search_before_planning,
            messages: Vec::new(),
            next: String::new(),
            full_plan: None,
            input: Vec::new(),
            initial_len: 0,
        }
    }

    /// Apply a node's patch. All fields land before the engine reads `goto`.
    pub fn apply(&mut self, patch: StatePatch) {
        self.messages.extend(patch.messages);
        if let Some(next) = patch.next {
            self.next = next;
        }
        if let Some(plan) = patch.full_plan {
            self.full_plan = Some(plan);
        }
    }

    pub fn roster_contains(&self, worker: Worker) -> bool {
        self.team_members.iter().any(|m| m == worker.as_str())
    }

    pub fn has_message_from(&self, worker: Worker) -> bool {
        self.messages
            .iter()
            .any(|m| m.name.as_deref() == Some(worker.as_str()))
    }

    /// Messages produced by this run, i.e. past the initial client input.
    pub fn produced_messages(&self) -> &[ChatMessage] {
        &self.messages[self.initial_len.min(self.messages.len())..]
    }

    pub fn message_values(&self) -> Vec<Value> {
        self.messages
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect()
    }

    /// The snapshot persisted into the session on termination.
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "messages": self.message_values(),
            "full_plan": self.full_plan,
            "team_members": self.team_members,
        })
    }
}

/// Partial update returned by a node.
#[derive(Debug, Default)]
pub struct StatePatch {
    pub messages: Vec<ChatMessage>,
    pub next: Option<String>,
    pub full_plan: Option<String>,
}

impl StatePatch {
    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn full_plan(mut self, plan: impl Into<String>) -> Self {
        self.full_plan = Some(plan.into());
        self
    }
}

/// Where control flows after a node completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goto {
    Worker(Worker),
    End,
}

/// A node's return value: a patch plus the next hop.
#[derive(Debug)]
pub struct NodeCommand {
    pub patch: StatePatch,
    pub goto: Goto,
}

impl NodeCommand {
    pub fn new(patch: StatePatch, goto: Goto) -> Self {
        Self { patch, goto }
    }

    pub fn end(patch: StatePatch) -> Self {
        Self {
            patch,
            goto: Goto::End,
        }
    }
}

/// The planner's structured breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub thought: String,
    pub title: String,
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub agent_name: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> WorkflowState {
        WorkflowState::new(
            "sess".to_string(),
            vec!["researcher".to_string(), "reporter".to_string()],
            false,
            false,
        )
    }

    #[test]
    fn apply_patches_all_fields_at_once() {
        let mut s = state();
        s.apply(
            StatePatch::default()
                .message(ChatMessage::assistant("found it").named("researcher"))
                .next("reporter")
                .full_plan("{\"steps\": []}"),
        );
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.next, "reporter");
        assert_eq!(s.full_plan.as_deref(), Some("{\"steps\": []}"));
    }

    #[test]
    fn apply_leaves_unpatched_fields_alone() {
        let mut s = state();
        s.next = "researcher".to_string();
        s.full_plan = Some("old".to_string());
        s.apply(StatePatch::default().message(ChatMessage::user("hi")));
        assert_eq!(s.next, "researcher");
        assert_eq!(s.full_plan.as_deref(), Some("old"));
    }

    #[test]
    fn produced_messages_excludes_client_input() {
        let mut s = state();
        s.messages.push(ChatMessage::user("question"));
        s.initial_len = 1;
        s.apply(StatePatch::default().message(ChatMessage::assistant("answer").named("reporter")));
        let produced = s.produced_messages();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].name.as_deref(), Some("reporter"));
    }

    #[test]
    fn roster_membership() {
        let s = state();
        assert!(s.roster_contains(Worker::Researcher));
        assert!(!s.roster_contains(Worker::Translator));
    }

    #[test]
    fn plan_round_trips_with_optional_note() {
        let raw = r#"{
            "thought": "needs research",
            "title": "Condition X",
            "steps": [
                {"agent_name": "researcher", "title": "search", "description": "find options"},
                {"agent_name": "reporter", "title": "write", "description": "final report", "note": "cite sources"}
            ]
        }"#;
        let plan: Plan = serde_json::from_str(raw).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].note, None);
        assert_eq!(plan.steps[1].note.as_deref(), Some("cite sources"));

        let back = serde_json::to_value(&plan).unwrap();
        assert!(back["steps"][0].get("note").is_none());
    }

    #[test]
    fn snapshot_contains_messages_and_plan() {
        let mut s = state();
        s.messages.push(ChatMessage::user("hi"));
        s.full_plan = Some("plan".to_string());
        let snap = s.snapshot();
        assert_eq!(snap["messages"].as_array().unwrap().len(), 1);
        assert_eq!(snap["full_plan"], "plan");
    }
}
