//! The worker roster: who exists, what they do, and which of them a client
//! may switch off.

use anyhow::{Result, bail};
use serde::Serialize;

use crate::core::llm::LlmClass;

/// Every node the workflow graph can visit. Adding a variant forces the
/// registry, prompt binder and tool kits to be extended: all of them match
/// exhaustively on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Worker {
    Coordinator,
    Planner,
    Supervisor,
    Researcher,
    Coder,
    Browser,
    Reporter,
    Translator,
}

impl Worker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Worker::Coordinator => "coordinator",
            Worker::Planner => "planner",
            Worker::Supervisor => "supervisor",
            Worker::Researcher => "researcher",
            Worker::Coder => "coder",
            Worker::Browser => "browser",
            Worker::Reporter => "reporter",
            Worker::Translator => "translator",
        }
    }

    pub fn parse(name: &str) -> Option<Worker> {
        match name {
            "coordinator" => Some(Worker::Coordinator),
            "planner" => Some(Worker::Planner),
            "supervisor" => Some(Worker::Supervisor),
            "researcher" => Some(Worker::Researcher),
            "coder" => Some(Worker::Coder),
            "browser" => Some(Worker::Browser),
            "reporter" => Some(Worker::Reporter),
            "translator" => Some(Worker::Translator),
            _ => None,
        }
    }

    /// Workers the supervisor may dispatch to, i.e. valid roster entries.
    pub fn dispatchable() -> &'static [Worker] {
        &[
            Worker::Researcher,
            Worker::Coder,
            Worker::Browser,
            Worker::Reporter,
            Worker::Translator,
        ]
    }
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry entry surfaced over `/api/team_members` and used for roster
/// validation and prompt substitution.
#[derive(Debug, Clone, Serialize)]
pub struct TeamMemberInfo {
    pub name: &'static str,
    pub desc: &'static str,
    pub desc_for_llm: &'static str,
    pub is_optional: bool,
    #[serde(skip)]
    pub llm_class: LlmClass,
}

/// Static table of dispatchable workers. Coordinator, planner and supervisor
/// are part of every run and are not listed: the client cannot toggle them.
pub fn team_members() -> &'static [TeamMemberInfo] {
    &[
        TeamMemberInfo {
            name: "researcher",
            desc: "Searches the web and medical literature, then summarizes findings.",
            desc_for_llm: "Uses web search, url crawling and abstract lookup to gather \
                           information. Outputs a Markdown summary. Cannot do math or code.",
            is_optional: true,
            llm_class: LlmClass::Basic,
        },
        TeamMemberInfo {
            name: "coder",
            desc: "Executes Python snippets and shell commands.",
            desc_for_llm: "Executes Python code and bash commands for math, data wrangling \
                           and system tasks, and reports the results.",
            is_optional: true,
            llm_class: LlmClass::Basic,
        },
        TeamMemberInfo {
            name: "browser",
            desc: "Drives a real browser to read dynamic pages.",
            desc_for_llm: "Navigates a headless browser to a concrete URL and performs the \
                           requested interaction or extraction there.",
            is_optional: true,
            llm_class: LlmClass::Vision,
        },
        TeamMemberInfo {
            name: "reporter",
            desc: "Writes the final report from the team's findings.",
            desc_for_llm: "Writes a professional report based solely on what the other team \
                           members produced. Always runs last.",
            is_optional: false,
            llm_class: LlmClass::Basic,
        },
        TeamMemberInfo {
            name: "translator",
            desc: "Translates non-English user input into English.",
            desc_for_llm: "Translates the user's request into English before the team works \
                           on it.",
            is_optional: true,
            llm_class: LlmClass::Basic,
        },
    ]
}

pub fn member_info(worker: Worker) -> Option<&'static TeamMemberInfo> {
    team_members().iter().find(|m| m.name == worker.as_str())
}

/// Default roster used when the client does not send `team_members`.
pub fn default_roster() -> Vec<String> {
    vec![
        "researcher".to_string(),
        "coder".to_string(),
        "browser".to_string(),
        "reporter".to_string(),
    ]
}

/// Check a client-supplied roster: non-empty, every name known and
/// dispatchable, and no mandatory worker disabled.
pub fn validate_roster(roster: &[String]) -> Result<()> {
    if roster.is_empty() {
        bail!("team_members must not be empty");
    }
    for name in roster {
        let Some(worker) = Worker::parse(name) else {
            bail!("unknown team member: {name}");
        };
        if !Worker::dispatchable().contains(&worker) {
            bail!("{name} is part of every run and cannot appear in team_members");
        }
    }
    for info in team_members().iter().filter(|m| !m.is_optional) {
        if !roster.iter().any(|n| n == info.name) {
            bail!("mandatory team member missing: {}", info.name);
        }
    }
    Ok(())
}

/// One-line roster description substituted into prompt templates.
pub fn describe_roster(roster: &[String]) -> String {
    roster
        .iter()
        .filter_map(|name| {
            team_members()
                .iter()
                .find(|m| m.name == name)
                .map(|m| format!("- `{}`: {}", m.name, m.desc_for_llm))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
