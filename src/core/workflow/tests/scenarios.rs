//! End-to-end scenario coverage: the trivial fast path, a planned research
//! run, search outage tolerance, malformed plans and routing failures.

use std::sync::Arc;

use super::mocks::*;
use crate::core::events::WorkflowEvent;
use crate::core::orchestrator::{
    ChatStreamRequest, ContentPart, IncomingMessage, MessageContent, TurnError,
};
use crate::core::tools::Tool;

const PLAN_JSON: &str = r#"{"thought": "needs literature research", "title": "Treatment options for condition X", "steps": [{"agent_name": "researcher", "title": "Gather evidence", "description": "Search recent treatment options"}, {"agent_name": "reporter", "title": "Write report", "description": "Summarize findings"}]}"#;

fn workflow_id_of(events: &[WorkflowEvent]) -> String {
    events
        .iter()
        .find_map(|e| match e {
            WorkflowEvent::StartOfWorkflow { workflow_id, .. } => Some(workflow_id.clone()),
            _ => None,
        })
        .expect("start_of_workflow present")
}

#[tokio::test]
async fn s1_trivial_greeting_takes_the_fast_path() {
    let llm = ScriptedLlm::new(&["Hello! How can I help with your medical questions today?"]);
    let rig = rig(llm, vec![]);

    let handle = rig
        .orchestrator
        .start_turn(request("hi", &["researcher", "reporter"]))
        .await
        .unwrap();
    let session_id = handle.session_id.clone();
    let events = collect_events(handle.events).await;

    let event_names = names(&events);
    assert_eq!(event_names[0], "session_id");
    assert_eq!(count(&events, "start_of_workflow"), 0);
    assert_eq!(count(&events, "end_of_workflow"), 0);
    assert_eq!(count(&events, "start_of_agent"), 1);
    assert_eq!(count(&events, "end_of_agent"), 1);
    assert_eq!(count(&events, "start_of_llm"), 1);
    assert_eq!(count(&events, "end_of_llm"), 1);
    assert!(count(&events, "message") >= 1);
    assert_eq!(count(&events, "final_session_state"), 1);
    assert_eq!(*event_names.last().unwrap(), "final_session_state");
    assert_bracket_nesting(&events);

    // S5: history rehydration after the run.
    let messages = rig.store.get_messages(&session_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].content, "hi");
    assert_eq!(messages[1].role, "assistant");
    assert!(messages[1].content.starts_with("Hello!"));

    let session = rig.store.get_session(&session_id).await.unwrap().unwrap();
    assert!(session.state.is_some());
}

#[tokio::test]
async fn s2_planned_research_runs_the_full_graph() {
    let llm = ScriptedLlm::new(&[
        "handoff_to_planner",
        PLAN_JSON,
        r#"{"next": "researcher"}"#,
        r#"<invoke name="web_search">{"query": "condition X treatment"}</invoke>"#,
        "Recent treatments include options A and B.",
        r#"{"next": "reporter"}"#,
        "## Treatment options\n\nOptions A and B are in current use.",
    ]);
    let search = CannedTool::new("web_search", succeed("A and B trial results"));
    let rig = rig(llm, vec![search.clone() as Arc<dyn Tool>]);

    let handle = rig
        .orchestrator
        .start_turn(request(
            "Summarize recent treatment options for condition X",
            &["researcher", "reporter"],
        ))
        .await
        .unwrap();
    let session_id = handle.session_id.clone();
    let events = collect_events(handle.events).await;

    assert_eq!(names(&events)[0], "session_id");
    assert_eq!(count(&events, "start_of_workflow"), 1);
    assert_eq!(count(&events, "end_of_workflow"), 1);
    assert_eq!(count(&events, "final_session_state"), 1);
    assert_bracket_nesting(&events);

    // start_of_workflow precedes every planner event.
    let wf_idx = events
        .iter()
        .position(|e| e.name() == "start_of_workflow")
        .unwrap();
    let planner_idx = events
        .iter()
        .position(|e| {
            matches!(e, WorkflowEvent::StartOfAgent { agent_name, .. } if agent_name == "planner")
        })
        .unwrap();
    assert!(wf_idx < planner_idx);

    // The projected agents, in order; the supervisor is filtered noise.
    let visited: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::StartOfAgent { agent_name, .. } => Some(agent_name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        visited,
        vec!["coordinator", "planner", "researcher", "reporter"]
    );

    // Tool bracket with the documented id discipline.
    let workflow_id = workflow_id_of(&events);
    let expected_tool_id = format!("{workflow_id}_researcher_web_search_0");
    let tool_call = events
        .iter()
        .find_map(|e| match e {
            WorkflowEvent::ToolCall {
                tool_call_id,
                tool_name,
                tool_input,
            } => Some((tool_call_id.clone(), tool_name.clone(), tool_input.clone())),
            _ => None,
        })
        .expect("tool_call emitted");
    assert_eq!(tool_call.0, expected_tool_id);
    assert_eq!(tool_call.1, "web_search");
    assert_eq!(tool_call.2["query"], "condition X treatment");
    let tool_result = events
        .iter()
        .find_map(|e| match e {
            WorkflowEvent::ToolCallResult {
                tool_call_id,
                tool_result,
                ..
            } => Some((tool_call_id.clone(), tool_result.clone())),
            _ => None,
        })
        .expect("tool_call_result emitted");
    assert_eq!(tool_result.0, expected_tool_id);
    assert!(tool_result.1.contains("A and B"));
    assert_eq!(search.call_count(), 1);

    // Delta reconstruction: the reporter's streamed message equals the
    // message fetched later via history, byte for byte.
    let reporter_message_id = events
        .iter()
        .rev()
        .find_map(|e| match e {
            WorkflowEvent::Message { message_id, .. } => Some(message_id.clone()),
            _ => None,
        })
        .unwrap();
    let reconstructed = reconstruct_message(&events, &reporter_message_id);

    let messages = rig.store.get_messages(&session_id).await.unwrap();
    let last = messages.last().unwrap();
    assert_eq!(last.role, "assistant");
    assert_eq!(last.kind, "text");
    assert_eq!(last.content, reconstructed);
    assert!(last.content.starts_with("## Treatment options"));

    // Planner and researcher contributions land as workflow messages.
    assert_eq!(messages[0].role, "user");
    assert!(messages.iter().any(|m| m.kind == "workflow"));

    let session = rig.store.get_session(&session_id).await.unwrap().unwrap();
    let state = session.state.unwrap();
    assert!(state["full_plan"].as_str().unwrap().contains("condition X"));
}

#[tokio::test]
async fn s3_search_outage_before_planning_is_non_fatal() {
    let llm = ScriptedLlm::new(&[
        "handoff_to_planner",
        PLAN_JSON,
        r#"{"next": "researcher"}"#,
        "Direct findings without tools.",
        r#"{"next": "reporter"}"#,
        "Final report.",
    ]);
    let search = CannedTool::new("web_search", fail_network("tavily unreachable"));
    let rig = rig(llm, vec![search.clone() as Arc<dyn Tool>]);

    let mut req = request(
        "Summarize recent treatment options for condition X",
        &["researcher", "reporter"],
    );
    req.search_before_planning = Some(true);

    let handle = rig.orchestrator.start_turn(req).await.unwrap();
    let session_id = handle.session_id.clone();
    let events = collect_events(handle.events).await;

    // The planner's internal search is not a team-member tool call: no tool
    // events flow, and the outage does not fail the run.
    assert_eq!(count(&events, "tool_call"), 0);
    assert_eq!(count(&events, "end_of_workflow"), 1);
    assert_eq!(search.call_count(), 1);

    let messages = rig.store.get_messages(&session_id).await.unwrap();
    let last = messages.last().unwrap();
    assert_eq!(last.role, "assistant");
    assert_eq!(last.content, "Final report.");
}

#[tokio::test]
async fn s6_malformed_plan_terminates_with_error_message() {
    let llm = ScriptedLlm::new(&[
        "handoff_to_planner",
        "I will research this for you right away.",
    ]);
    let rig = rig(llm, vec![]);

    let handle = rig
        .orchestrator
        .start_turn(request("complex question", &["researcher", "reporter"]))
        .await
        .unwrap();
    let session_id = handle.session_id.clone();
    let events = collect_events(handle.events).await;

    // The workflow was triggered, so it still closes with an envelope.
    assert_eq!(count(&events, "start_of_workflow"), 1);
    assert_eq!(count(&events, "end_of_workflow"), 1);
    assert_bracket_nesting(&events);

    let messages = rig.store.get_messages(&session_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[1].role, "assistant");
    assert!(messages[1].content.contains("could not be completed"));
    assert!(messages[1].content.contains("plan"));

    // The session still advanced to a consistent state.
    let session = rig.store.get_session(&session_id).await.unwrap().unwrap();
    assert!(session.state.is_some());
}

#[tokio::test]
async fn supervisor_routing_outside_roster_fails_the_run() {
    let llm = ScriptedLlm::new(&[
        "handoff_to_planner",
        PLAN_JSON,
        r#"{"next": "browser"}"#,
        r#"{"next": "browser"}"#,
    ]);
    let rig = rig(llm, vec![]);

    let handle = rig
        .orchestrator
        .start_turn(request("question", &["researcher", "reporter"]))
        .await
        .unwrap();
    let session_id = handle.session_id.clone();
    let events = collect_events(handle.events).await;

    assert_eq!(count(&events, "end_of_workflow"), 1);
    let visited: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::StartOfAgent { agent_name, .. } => Some(agent_name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(visited, vec!["coordinator", "planner"]);

    let messages = rig.store.get_messages(&session_id).await.unwrap();
    let last = messages.last().unwrap();
    assert_eq!(last.role, "assistant");
    assert!(last.content.contains("could not be completed"));
    assert!(last.content.contains("roster"));
}

#[tokio::test]
async fn empty_roster_is_rejected_before_any_event() {
    let llm = ScriptedLlm::new(&[]);
    let rig = rig(llm, vec![]);

    let out = rig.orchestrator.start_turn(request("hi", &[])).await;
    assert!(matches!(out, Err(TurnError::BadRequest(_))));
}

#[tokio::test]
async fn roster_missing_reporter_is_rejected() {
    let llm = ScriptedLlm::new(&[]);
    let rig = rig(llm, vec![]);

    let out = rig
        .orchestrator
        .start_turn(request("hi", &["researcher"]))
        .await;
    assert!(matches!(out, Err(TurnError::BadRequest(_))));
}

#[tokio::test]
async fn unknown_session_id_is_rejected_with_not_found() {
    let llm = ScriptedLlm::new(&[]);
    let rig = rig(llm, vec![]);

    let mut req = request("hi", &["reporter"]);
    req.session_id = Some("00000000-0000-0000-0000-000000000000".to_string());
    let out = rig.orchestrator.start_turn(req).await;
    assert!(matches!(out, Err(TurnError::NotFound(_))));
}

#[tokio::test]
async fn empty_messages_are_rejected() {
    let llm = ScriptedLlm::new(&[]);
    let rig = rig(llm, vec![]);

    let req = ChatStreamRequest {
        messages: vec![],
        debug: None,
        deep_thinking_mode: None,
        search_before_planning: None,
        team_members: None,
        session_id: None,
    };
    let out = rig.orchestrator.start_turn(req).await;
    assert!(matches!(out, Err(TurnError::BadRequest(_))));
}

#[tokio::test]
async fn image_parts_are_ignored_by_non_vision_workers() {
    let llm = ScriptedLlm::new(&["That looks like a prescription label; I can explain it."]);
    let rig = rig(llm, vec![]);

    let req = ChatStreamRequest {
        messages: vec![IncomingMessage {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![
                ContentPart {
                    kind: "text".to_string(),
                    text: Some("what is this?".to_string()),
                    image_url: None,
                },
                ContentPart {
                    kind: "image".to_string(),
                    text: None,
                    image_url: Some("http://example.com/scan.png".to_string()),
                },
            ]),
        }],
        debug: None,
        deep_thinking_mode: None,
        search_before_planning: None,
        team_members: Some(vec!["researcher".to_string(), "reporter".to_string()]),
        session_id: None,
    };

    let handle = rig.orchestrator.start_turn(req).await.unwrap();
    let session_id = handle.session_id.clone();
    let events = collect_events(handle.events).await;

    // The run proceeds; the image is carried in the stored turn only.
    assert_eq!(count(&events, "final_session_state"), 1);
    let messages = rig.store.get_messages(&session_id).await.unwrap();
    assert!(messages[0].content.contains("scan.png"));
    assert_eq!(messages.last().unwrap().role, "assistant");
}

#[tokio::test]
async fn second_concurrent_run_on_a_session_is_rejected() {
    let llm = ScriptedLlm::with_script(vec![
        ScriptedResponse::delayed("Hello!", std::time::Duration::from_millis(200)),
        ScriptedResponse::plain("Hello again!"),
    ]);
    let rig = rig(llm, vec![]);

    let first = rig
        .orchestrator
        .start_turn(request("hi", &["reporter"]))
        .await
        .unwrap();

    let mut second_req = request("hi again", &["reporter"]);
    second_req.session_id = Some(first.session_id.clone());
    let second = rig.orchestrator.start_turn(second_req).await;
    assert!(matches!(second, Err(TurnError::BadRequest(_))));

    // After the first run drains, the session is free again.
    let _ = collect_events(first.events).await;
    let mut third_req = request("hi again", &["reporter"]);
    third_req.session_id = Some(first.session_id.clone());
    assert!(rig.orchestrator.start_turn(third_req).await.is_ok());
}
