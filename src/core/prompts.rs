//! Prompt binder: turns a worker name plus the live workflow state into the
//! message list handed to the model.
//!
//! Pure over its inputs; the only moving parts are the two substitutions
//! (`{CURRENT_TIME}`, `{TEAM_MEMBERS}`) and the state's accumulated messages.

use chrono::Utc;

use crate::core::llm::ChatMessage;
use crate::core::team::{self, Worker};
use crate::core::workflow::state::WorkflowState;

const COORDINATOR_TEMPLATE: &str = "\
You are the coordinator of DeepMedical, a team of AI agents answering medical \
information questions. Current time: {CURRENT_TIME}.\n\
\n\
If the request is small talk, a greeting, or something you can answer directly \
and safely in one short reply, answer it yourself.\n\
For anything that needs research, computation, browsing or a written report, \
do NOT answer: reply with exactly `handoff_to_planner` and nothing else.\n\
\n\
The team behind you:\n{TEAM_MEMBERS}\n";

const PLANNER_TEMPLATE: &str = "\
You are the planner. Current time: {CURRENT_TIME}.\n\
\n\
Break the user's request into steps for the team below. Respond with ONLY a \
JSON object of this exact shape:\n\
{\"thought\": \"...\", \"title\": \"...\", \"steps\": [{\"agent_name\": \"...\", \
\"title\": \"...\", \"description\": \"...\", \"note\": \"...\"}]}\n\
\n\
`agent_name` must be one of the team members listed below. The reporter, if \
present, is always the final step.\n\
\n\
Team members:\n{TEAM_MEMBERS}\n";

const SUPERVISOR_TEMPLATE: &str = "\
You are the supervisor. Current time: {CURRENT_TIME}.\n\
\n\
Given the conversation so far and the plan, decide which team member acts \
next. Respond with ONLY a JSON object: {\"next\": \"<team member name>\"}. \
When every step of the plan is done, respond {\"next\": \"FINISH\"}.\n\
\n\
Team members:\n{TEAM_MEMBERS}\n";

const RESEARCHER_TEMPLATE: &str = "\
You are the researcher. Current time: {CURRENT_TIME}.\n\
\n\
Work on the step assigned to you in the plan. Gather evidence with your tools, \
then summarize what you found in Markdown, citing sources. Never fabricate \
citations, never do math, never write code.\n";

const CODER_TEMPLATE: &str = "\
You are the coder. Current time: {CURRENT_TIME}.\n\
\n\
Work on the step assigned to you in the plan. Use Python for calculation and \
data handling, bash for system tasks. Show the results you obtained, not the \
code alone.\n";

const BROWSER_TEMPLATE: &str = "\
You are the browser operator. Current time: {CURRENT_TIME}.\n\
\n\
Work on the step assigned to you in the plan by driving the browser tool \
against concrete URLs, then report what the pages contained.\n";

const REPORTER_TEMPLATE: &str = "\
You are the reporter. Current time: {CURRENT_TIME}.\n\
\n\
Write the final answer for the user as a clear, professional report, using \
ONLY information the team gathered above. State plainly when evidence is \
missing; never invent findings.\n";

const TRANSLATOR_TEMPLATE: &str = "\
You are the translator. Current time: {CURRENT_TIME}.\n\
\n\
Translate the user's request into English, preserving medical terminology \
precisely. Reply with the translation only.\n";

const TOOL_PROTOCOL: &str = "\
\n\
TOOLS:\n{TOOLS}\n\
To use a tool, reply with exactly one invocation and nothing else:\n\
<invoke name=\"tool_name\">{\"arg\": \"value\"}</invoke>\n\
The arguments are a JSON object matching the tool's parameters. After each \
result you may invoke another tool or, when the step is done, reply with your \
final text.\n";

fn template_for(worker: Worker) -> &'static str {
    match worker {
        Worker::Coordinator => COORDINATOR_TEMPLATE,
        Worker::Planner => PLANNER_TEMPLATE,
        Worker::Supervisor => SUPERVISOR_TEMPLATE,
        Worker::Researcher => RESEARCHER_TEMPLATE,
        Worker::Coder => CODER_TEMPLATE,
        Worker::Browser => BROWSER_TEMPLATE,
        Worker::Reporter => REPORTER_TEMPLATE,
        Worker::Translator => TRANSLATOR_TEMPLATE,
    }
}

/// Render the system prompt for `worker` and append the state's message log.
pub fn apply_prompt_template(worker: Worker, state: &WorkflowState) -> Vec<ChatMessage> {
    let system = render_system_prompt(worker, state, &[]);
    bind(system, state)
}

/// Same as [`apply_prompt_template`], with the tool protocol block appended
/// for workers that carry tools.
pub fn apply_prompt_template_with_tools(
    worker: Worker,
    state: &WorkflowState,
    tool_lines: &[String],
) -> Vec<ChatMessage> {
    let system = render_system_prompt(worker, state, tool_lines);
    bind(system, state)
}

fn render_system_prompt(worker: Worker, state: &WorkflowState, tool_lines: &[String]) -> String {
    let mut prompt = template_for(worker)
        .replace("{CURRENT_TIME}", &Utc::now().to_rfc3339())
        .replace("{TEAM_MEMBERS}", &team::describe_roster(&state.team_members));

    if !tool_lines.is_empty() {
        prompt.push_str(&TOOL_PROTOCOL.replace("{TOOLS}", &tool_lines.join("\n")));
    }
    prompt
}

fn bind(system: String, state: &WorkflowState) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(state.messages.len() + 1);
    messages.push(ChatMessage::system(system));
    messages.extend(state.messages.iter().cloned());
    messages
}
