//! Generic react-style worker: a loop of LLM call → optional tool call →
//! observation, until the worker produces a final text. Every team member is
//! an instance of this loop with its own prompt and tool kit.

use anyhow::{Result, bail};
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::events::WorkflowEvent;
use crate::core::llm::{ChatMessage, LlmHub};
use crate::core::prompts;
use crate::core::team::Worker;
use crate::core::tools::{self, ToolContext};
use crate::core::workflow::engine::{RunContext, WorkflowEngine};
use crate::core::workflow::state::{FINISH, Goto, NodeCommand, StatePatch, WorkflowState};

/// Upper bound on LLM turns inside one worker activation.
const MAX_REACT_STEPS: usize = 10;
/// Consecutive tool failures before the worker cedes with a degraded answer.
const MAX_CONSECUTIVE_ERRORS: usize = 3;
const OBSERVATION_MAX_CHARS: usize = 6_000;

pub async fn run_worker(
    engine: &WorkflowEngine,
    worker: Worker,
    state: &WorkflowState,
    ctx: &mut RunContext,
) -> Result<NodeCommand> {
    let class = LlmHub::class_for_worker(worker, state.deep_thinking_mode);
    let kit = engine.tools().kit_for(worker);
    let tool_lines: Vec<String> = kit
        .iter()
        .map(|t| {
            format!(
                "- {}: {} Parameters: {}",
                t.name(),
                t.description(),
                t.parameters()
            )
        })
        .collect();

    let mut convo = prompts::apply_prompt_template_with_tools(worker, state, &tool_lines);
    let invoke_re = Regex::new(r#"<invoke\s+name\s*=\s*["']([^"']+)["']\s*>([\s\S]*?)</invoke>"#)
        .expect("invoke regex");

    let mut consecutive_errors = 0usize;
    let mut degraded: Option<String> = None;
    let mut final_text = String::new();

    for step in 0..MAX_REACT_STEPS {
        if ctx.cancel.is_cancelled() {
            bail!("cancelled");
        }

        let response = engine.stream_llm(worker, class, &convo, ctx).await?;
        final_text = response.clone();

        let Some((tool_name, args)) = invoke_re.captures(&response).map(|captures| {
            (
                captures
                    .get(1)
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default(),
                parse_tool_args(captures.get(2).map(|m| m.as_str()).unwrap_or("")),
            )
        }) else {
            // No tool call: this is the worker's answer.
            break;
        };

        let tool_call_id = ctx.next_tool_call_id(worker, &tool_name);
        ctx.emit(WorkflowEvent::ToolCall {
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.clone(),
            tool_input: args.clone(),
        });
        info!(worker = %worker, tool = %tool_name, step, "Tool invocation");

        let observation = match kit.iter().find(|t| t.name() == tool_name) {
            Some(tool) => {
                let tool_ctx = ToolContext {
                    tool_call_id: tool_call_id.clone(),
                    run_id: ctx.workflow_id.clone(),
                    cancel: ctx.cancel.clone(),
                };
                match tools::invoke_with_retry(tool, args, &tool_ctx).await {
                    Ok(out) => {
                        consecutive_errors = 0;
                        out
                    }
                    Err(e) => {
                        if ctx.cancel.is_cancelled() {
                            bail!("cancelled");
                        }
                        consecutive_errors += 1;
                        warn!(worker = %worker, tool = %tool_name, "Tool failed: {e}");
                        format!("Error: {e}")
                    }
                }
            }
            None => {
                consecutive_errors += 1;
                warn!(worker = %worker, "Unknown tool requested: {tool_name}");
                format!("Error: tool '{tool_name}' is not available to you")
            }
        };

        let observation = clamp_observation(observation);
        ctx.emit(WorkflowEvent::ToolCallResult {
            tool_call_id,
            tool_name: tool_name.clone(),
            tool_result: observation.clone(),
        });

        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            // Cede control with a degraded answer rather than spinning.
            warn!(worker = %worker, "Too many consecutive tool failures, giving up");
            degraded = Some(format!(
                "I could not complete this step; the last tool error was: {observation}"
            ));
            break;
        }

        convo.push(ChatMessage::assistant(response));
        convo.push(ChatMessage::system(format!(
            "TOOL RESULT [{tool_name}]:\n{observation}\n\n\
             Invoke another tool if the step needs more work; otherwise reply \
             with your final answer for this step."
        )));
    }

    let content = degraded.unwrap_or(final_text);
    let message = ChatMessage::assistant(content).named(worker.as_str());

    let goto = next_hop(worker, state);
    let patch = match goto {
        Goto::End => StatePatch::default().next(FINISH).message(message),
        Goto::Worker(w) => StatePatch::default().next(w.as_str()).message(message),
    };
    Ok(NodeCommand::new(patch, goto))
}

/// Reporter ends the run; the translator pre-pass returns to the
/// coordinator; everyone else reports back to the supervisor.
fn next_hop(worker: Worker, state: &WorkflowState) -> Goto {
    match worker {
        Worker::Reporter => Goto::End,
        Worker::Translator if state.full_plan.is_none() => Goto::Worker(Worker::Coordinator),
        _ => Goto::Worker(Worker::Supervisor),
    }
}

/// Tool arguments are a JSON object; tolerate bare strings by wrapping them.
fn parse_tool_args(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => serde_json::json!({ "input": other }),
        Err(_) => serde_json::json!({ "input": trimmed }),
    }
}

fn clamp_observation(text: String) -> String {
    if text.chars().count() > OBSERVATION_MAX_CHARS {
        let truncated: String = text.chars().take(OBSERVATION_MAX_CHARS).collect();
        format!("{truncated}\n...[truncated]")
    } else {
        text
    }
}
