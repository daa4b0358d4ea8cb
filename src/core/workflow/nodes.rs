//! The three control nodes: coordinator, planner, supervisor.
//!
//! Team members are generic react workers (see [`super::react`]); these three
//! carry the routing logic of the graph.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{info, warn};

use crate::core::llm::structured;
use crate::core::llm::{ChatMessage, LlmClass};
use crate::core::prompts;
use crate::core::team::Worker;
use crate::core::tools::{ToolContext, ToolError};
use crate::core::workflow::engine::{RunContext, WorkflowEngine};
use crate::core::workflow::state::{FINISH, Goto, NodeCommand, Plan, StatePatch, WorkflowState};

/// Marker the coordinator emits to cede control to the planner.
pub const HANDOFF_MARKER: &str = "handoff_to_planner";

/// Coordinator: answers trivially or hands the request to the planner. When
/// the roster carries a translator and the user turn is not English, it
/// routes through the translator once before deciding.
pub async fn coordinator(
    engine: &WorkflowEngine,
    state: &WorkflowState,
    ctx: &mut RunContext,
) -> Result<NodeCommand> {
    if needs_translation(state) {
        info!("Non-English input, routing through translator");
        return Ok(NodeCommand::new(
            StatePatch::default().next(Worker::Translator.as_str()),
            Goto::Worker(Worker::Translator),
        ));
    }

    let messages = prompts::apply_prompt_template(Worker::Coordinator, state);
    let response = engine
        .stream_llm_gated(Worker::Coordinator, LlmClass::Basic, &messages, ctx)
        .await?;

    if response.contains(HANDOFF_MARKER) {
        info!("Coordinator handed off to planner");
        return Ok(NodeCommand::new(
            StatePatch::default().next(Worker::Planner.as_str()),
            Goto::Worker(Worker::Planner),
        ));
    }

    // Fast path: the reply itself is the answer; the run ends here.
    Ok(NodeCommand::end(
        StatePatch::default()
            .next(FINISH)
            .message(ChatMessage::assistant(response).named(Worker::Coordinator.as_str())),
    ))
}

/// Planner: optionally enriches its prompt with search results, streams the
/// plan, and requires it to parse. An unparseable plan ends the run.
pub async fn planner(
    engine: &WorkflowEngine,
    state: &WorkflowState,
    ctx: &mut RunContext,
) -> Result<NodeCommand> {
    let mut messages = prompts::apply_prompt_template(Worker::Planner, state);

    if state.search_before_planning {
        match pre_planning_search(engine, state, ctx).await {
            Ok(results) => messages.push(ChatMessage::system(format!(
                "Relevant web search results for the request:\n{results}"
            ))),
            // Search outages must not take the planner down.
            Err(e) => warn!("Pre-planning search failed, planning without it: {e}"),
        }
    }

    let class = if state.deep_thinking_mode {
        LlmClass::Reasoning
    } else {
        LlmClass::Basic
    };
    let response = engine
        .stream_llm(Worker::Planner, class, &messages, ctx)
        .await?;

    let plan: Plan = structured::parse_structured(&response)
        .context("planner produced an invalid plan")?;
    info!(title = %plan.title, steps = plan.steps.len(), "Plan accepted");

    let plan_json = serde_json::to_string(&plan)?;
    Ok(NodeCommand::new(
        StatePatch::default()
            .full_plan(plan_json.clone())
            .next(Worker::Supervisor.as_str())
            .message(ChatMessage::assistant(plan_json).named(Worker::Planner.as_str())),
        Goto::Worker(Worker::Supervisor),
    ))
}

async fn pre_planning_search(
    engine: &WorkflowEngine,
    state: &WorkflowState,
    ctx: &mut RunContext,
) -> Result<String, ToolError> {
    let tool = engine
        .tools()
        .get("web_search")
        .ok_or_else(|| ToolError::Permanent("web_search tool not registered".to_string()))?;

    let query = state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .unwrap_or_default();

    // This runs inside the planner, not a team member: no tool events flow.
    let tool_ctx = ToolContext {
        tool_call_id: ctx.next_tool_call_id(Worker::Planner, "web_search"),
        run_id: ctx.workflow_id.clone(),
        cancel: ctx.cancel.clone(),
    };
    tool.invoke(serde_json::json!({ "query": query }), &tool_ctx)
        .await
}

#[derive(Debug, Deserialize)]
struct Router {
    next: String,
}

/// Supervisor: structured routing decision. `FINISH` terminates; anything
/// else must name a roster member.
pub async fn supervisor(
    engine: &WorkflowEngine,
    state: &WorkflowState,
    ctx: &mut RunContext,
) -> Result<NodeCommand> {
    let messages = prompts::apply_prompt_template(Worker::Supervisor, state);
    let client = engine.llm().client_for(LlmClass::Basic);

    // Structured call, no streaming: the supervisor's output is routing, not
    // content, so nothing of it reaches the client stream.
    let router = tokio::select! {
        decision = structured::coerce::<Router>(&client, &messages) => decision,
        _ = ctx.cancel.cancelled() => bail!("cancelled"),
    }
    .context("supervisor routing decision failed")?;

    if router.next == FINISH {
        info!("Supervisor finished the workflow");
        return Ok(NodeCommand::end(StatePatch::default().next(FINISH)));
    }

    let Some(worker) = Worker::parse(&router.next) else {
        bail!("supervisor selected an unknown worker: {}", router.next);
    };
    if !Worker::dispatchable().contains(&worker) || !state.roster_contains(worker) {
        bail!(
            "supervisor selected a worker outside the team roster: {}",
            router.next
        );
    }

    info!(next = %router.next, "Supervisor dispatched");
    Ok(NodeCommand::new(
        StatePatch::default().next(router.next),
        Goto::Worker(worker),
    ))
}

/// True when the latest user turn contains CJK text and the roster carries a
/// translator that has not run yet.
fn needs_translation(state: &WorkflowState) -> bool {
    if !state.roster_contains(Worker::Translator) || state.has_message_from(Worker::Translator) {
        return false;
    }
    state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| contains_cjk(&m.content))
        .unwrap_or(false)
}

fn contains_cjk(text: &str) -> bool {
    text.chars()
        .any(|c| matches!(c as u32, 0x4E00..=0x9FFF | 0x3040..=0x30FF | 0xAC00..=0xD7AF))
}
