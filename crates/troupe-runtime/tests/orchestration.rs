//! End-to-end orchestration flows against a scripted execution engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use serde_json::json;

use troupe_bridge::engine::{
    EngineError, ExecutionEngine, RealtimeInputStream, TaskEventStream, TaskPayload,
};
use troupe_core::agents::{AgentDefinition, AgentState, SessionState};
use troupe_core::events::TaskEvent;
use troupe_core::errors::OrchestratorError;
use troupe_core::history::HistoryRole;
use troupe_core::ids::{SessionId, TaskId};
use troupe_mcp::dispatcher::CallMode;
use troupe_mcp::protocol::{AGENT_NOT_FOUND, JsonRpcRequest};
use troupe_runtime::session_manager::{OpenSessionParams, SendOutcome, SessionManager};
use troupe_runtime::settings::OrchestratorSettings;
use troupe_runtime::store::InMemoryStore;
use troupe_tasks::task::{Task, TaskSource, TaskStatus};

/// Scripted engine: behavior keyed on the task input.
///
/// - `translate <word>` — stream a translation and finish
/// - `use_helper` — request a `call_agent` tool call, then finish
/// - `slow` — finish after a short delay
/// - `hang` — never produce a chunk
/// - anything else — echo
struct ScriptedEngine;

fn translate(word: &str) -> &'static str {
    match word {
        "hello" => "bonjour",
        "world" => "monde",
        _ => "je ne sais pas",
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn run_task(&self, payload: TaskPayload) -> Result<TaskEventStream, EngineError> {
        let input = payload.input.clone();

        if let Some(word) = input.strip_prefix("translate ") {
            let result = translate(word).to_owned();
            return Ok(Box::pin(stream::iter(vec![
                Ok(TaskEvent::Text { text: result.clone() }),
                Ok(TaskEvent::Done { result }),
            ])));
        }

        if input == "use_helper" {
            return Ok(Box::pin(stream::iter(vec![
                Ok(TaskEvent::ToolCall {
                    tool_call_id: "tc-helper".into(),
                    name: "call_agent".into(),
                    arguments: json!({"target_name": "translator", "message": "translate hello"}),
                }),
                Ok(TaskEvent::Done { result: "done with help".into() }),
            ])));
        }

        if input == "slow" {
            return Ok(Box::pin(stream::once(async {
                tokio::time::sleep(Duration::from_millis(60)).await;
                Ok(TaskEvent::Done { result: "slow done".into() })
            })));
        }

        if input == "hang" {
            return Ok(Box::pin(stream::pending()));
        }

        let result = format!("echo: {input}");
        Ok(Box::pin(stream::iter(vec![Ok(TaskEvent::Done { result })])))
    }

    async fn realtime_chat(
        &self,
        _session_id: SessionId,
        _inbound: RealtimeInputStream,
    ) -> Result<TaskEventStream, EngineError> {
        Ok(Box::pin(stream::iter(vec![Ok(TaskEvent::Done {
            result: "live".into(),
        })])))
    }
}

fn make_manager() -> Arc<SessionManager> {
    SessionManager::new(
        Arc::new(ScriptedEngine),
        Arc::new(InMemoryStore::new()),
        troupe_mcp::registry::ToolRegistry::new(),
        OrchestratorSettings::default(),
    )
}

async fn wait_status(manager: &SessionManager, task_id: &TaskId, status: TaskStatus) -> Task {
    for _ in 0..200 {
        if let Some(task) = manager.task(task_id) {
            if task.status == status {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {task_id} never reached {status:?}");
}

fn accepted(outcome: SendOutcome) -> TaskId {
    match outcome {
        SendOutcome::Accepted { task_id } => task_id,
        SendOutcome::Completed { .. } => panic!("expected async acceptance"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent collaboration
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn agent_calls_sub_agent_and_resumes() {
    let manager = make_manager();
    let session = manager.open_session(OpenSessionParams::new("alice", "translation team"));

    let translator_def = AgentDefinition::new("translator", "claude-sonnet-4").callable(true);
    let lead_def = AgentDefinition::new("lead", "claude-opus-4")
        .with_sub_agents(vec![translator_def.id.clone()]);
    let translator = manager.spawn_agent(&session, translator_def).unwrap();
    let lead = manager.spawn_agent(&session, lead_def).unwrap();

    let task_id = accepted(
        manager
            .send_message(&session, &lead.id, "use_helper", CallMode::Async)
            .await
            .unwrap(),
    );
    let mut events = manager.subscribe_task(&task_id);

    let task = wait_status(&manager, &task_id, TaskStatus::Completed).await;
    assert_eq!(task.result.as_deref(), Some("done with help"));

    // The nested task ran on the translator and settled into its history
    let history = manager.history(&translator.id);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, HistoryRole::User);
    assert_eq!(history[0].content, "translate hello");
    assert_eq!(history[1].role, HistoryRole::Assistant);
    assert_eq!(history[1].content, "bonjour");

    // The lead's stream republished the nested result before finishing
    let mut saw_tool_call = false;
    let mut nested_result = None;
    while let Ok(event) = events.try_recv() {
        match event {
            TaskEvent::ToolCall { ref name, .. } if name == "call_agent" => saw_tool_call = true,
            TaskEvent::ToolResult { result, .. } => nested_result = Some(result),
            _ => {}
        }
    }
    assert!(saw_tool_call);
    let nested = nested_result.expect("nested tool result should be republished");
    assert_eq!(nested["status"], "completed");
    assert_eq!(nested["result"], "bonjour");

    // The nested task was attributed to the lead agent
    let nested_task = manager.task(&TaskId::from(nested["task_id"].as_str().unwrap())).unwrap();
    assert_eq!(nested_task.source, TaskSource::Agent(lead.id.clone()));
    assert_eq!(nested_task.target, translator.id);
}

#[tokio::test]
async fn uncallable_target_yields_agent_not_found() {
    let manager = make_manager();
    let session = manager.open_session(OpenSessionParams::new("alice", "team"));

    // translator exists but is neither callable_by_others nor a sub-agent
    let translator_def = AgentDefinition::new("translator", "claude-sonnet-4");
    let lead_def = AgentDefinition::new("lead", "claude-opus-4");
    let _ = manager.spawn_agent(&session, translator_def).unwrap();
    let lead = manager.spawn_agent(&session, lead_def).unwrap();

    let task_id = accepted(
        manager
            .send_message(&session, &lead.id, "use_helper", CallMode::Async)
            .await
            .unwrap(),
    );
    let mut events = manager.subscribe_task(&task_id);
    let _ = wait_status(&manager, &task_id, TaskStatus::Completed).await;

    let mut error_payload = None;
    while let Ok(event) = events.try_recv() {
        if let TaskEvent::ToolResult { result, .. } = event {
            error_payload = Some(result);
        }
    }
    let payload = error_payload.expect("tool result with error payload");
    assert_eq!(payload["error"]["code"], AGENT_NOT_FOUND);
}

// ─────────────────────────────────────────────────────────────────────────────
// Queueing and promotion
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_call_queues_then_promotes() {
    let manager = make_manager();
    let session = manager.open_session(OpenSessionParams::new("alice", "w"));
    let worker = manager
        .spawn_agent(&session, AgentDefinition::new("worker", "gpt-4.1"))
        .unwrap();

    let t1 = accepted(
        manager
            .send_message(&session, &worker.id, "slow", CallMode::Async)
            .await
            .unwrap(),
    );
    let t2 = accepted(
        manager
            .send_message(&session, &worker.id, "slow", CallMode::Async)
            .await
            .unwrap(),
    );

    assert_eq!(manager.task(&t1).unwrap().status, TaskStatus::Running);
    assert_eq!(manager.task(&t2).unwrap().status, TaskStatus::Queued);
    assert_eq!(manager.agent(&worker.id).unwrap().state, AgentState::Busy);

    // T2 promotes automatically when T1 settles, with no external nudge
    let t1_final = wait_status(&manager, &t1, TaskStatus::Completed).await;
    let t2_final = wait_status(&manager, &t2, TaskStatus::Completed).await;
    assert!(t1_final.updated_at <= t2_final.updated_at, "FIFO completion order");
    assert_eq!(manager.agent(&worker.id).unwrap().state, AgentState::Idle);
}

#[tokio::test]
async fn interrupt_cancels_running_but_keeps_queued() {
    let manager = make_manager();
    let session = manager.open_session(OpenSessionParams::new("alice", "w"));
    let worker = manager
        .spawn_agent(&session, AgentDefinition::new("worker", "gpt-4.1"))
        .unwrap();

    let t1 = accepted(
        manager
            .send_message(&session, &worker.id, "hang", CallMode::Async)
            .await
            .unwrap(),
    );
    let t2 = accepted(
        manager
            .send_message(&session, &worker.id, "slow", CallMode::Async)
            .await
            .unwrap(),
    );
    // Let the hanging bridge run start
    tokio::time::sleep(Duration::from_millis(20)).await;

    let signalled = manager.interrupt(&session).unwrap();
    assert_eq!(signalled, 1);

    let _ = wait_status(&manager, &t1, TaskStatus::Cancelled).await;
    // The queued task survived the interrupt and promoted afterwards
    let _ = wait_status(&manager, &t2, TaskStatus::Completed).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Close semantics
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn close_cancels_everything_and_rejects_new_work() {
    let manager = make_manager();
    let session = manager.open_session(OpenSessionParams::new("alice", "w"));
    let worker = manager
        .spawn_agent(&session, AgentDefinition::new("worker", "gpt-4.1"))
        .unwrap();

    let running = accepted(
        manager
            .send_message(&session, &worker.id, "hang", CallMode::Async)
            .await
            .unwrap(),
    );
    let queued = accepted(
        manager
            .send_message(&session, &worker.id, "never runs", CallMode::Async)
            .await
            .unwrap(),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    manager.close(&session).unwrap();

    // Queued settles immediately; running settles once its bridge tears down
    assert_eq!(manager.task(&queued).unwrap().status, TaskStatus::Cancelled);
    let _ = wait_status(&manager, &running, TaskStatus::Cancelled).await;
    assert_eq!(manager.session(&session).unwrap().state, SessionState::Closed);

    let err = manager
        .send_message(&session, &worker.id, "more", CallMode::Sync)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::State(_)));

    // Idempotent
    manager.close(&session).unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Synchronous path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sync_send_round_trip() {
    let manager = make_manager();
    let session = manager.open_session(OpenSessionParams::new("alice", "w"));
    let translator = manager
        .spawn_agent(
            &session,
            AgentDefinition::new("translator", "claude-sonnet-4").callable(true),
        )
        .unwrap();

    let outcome = manager
        .send_message(&session, &translator.id, "translate world", CallMode::Sync)
        .await
        .unwrap();
    match outcome {
        SendOutcome::Completed { task } => {
            assert_eq!(task.result.as_deref(), Some("monde"));
            assert_eq!(task.status, TaskStatus::Completed);
        }
        SendOutcome::Accepted { .. } => panic!("sync send must block for the result"),
    }
}

#[tokio::test]
async fn sync_send_times_out_against_hanging_engine() {
    let manager = SessionManager::new(
        Arc::new(ScriptedEngine),
        Arc::new(InMemoryStore::new()),
        troupe_mcp::registry::ToolRegistry::new(),
        OrchestratorSettings {
            sync_call_timeout_ms: 150,
            ..Default::default()
        },
    );
    let session = manager.open_session(OpenSessionParams::new("alice", "w"));
    let worker = manager
        .spawn_agent(&session, AgentDefinition::new("worker", "gpt-4.1"))
        .unwrap();

    let err = manager
        .send_message(&session, &worker.id, "hang", CallMode::Sync)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Timeout { .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP surface
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn call_agent_via_rpc_surface() {
    let manager = make_manager();
    let session = manager.open_session(OpenSessionParams::new("alice", "w"));
    let translator_def = AgentDefinition::new("translator", "claude-sonnet-4").callable(true);
    let lead_def =
        AgentDefinition::new("lead", "claude-opus-4").with_sub_agents(vec![translator_def.id.clone()]);
    let _ = manager.spawn_agent(&session, translator_def).unwrap();
    let lead = manager.spawn_agent(&session, lead_def).unwrap();

    let req = JsonRpcRequest::new(
        json!("rpc-1"),
        "tools/call",
        Some(json!({
            "name": "call_agent",
            "arguments": {"target_name": "translator", "message": "translate hello"},
        })),
    );
    let resp = manager.handle_tool_request(&session, Some(&lead.id), req).await;
    assert_eq!(resp.id, json!("rpc-1"));
    let result = resp.result.expect("call should succeed");
    assert_eq!(result["result"], "bonjour");
}

#[tokio::test]
async fn remove_agent_requires_drain() {
    let manager = make_manager();
    let session = manager.open_session(OpenSessionParams::new("alice", "w"));
    let worker = manager
        .spawn_agent(&session, AgentDefinition::new("worker", "gpt-4.1"))
        .unwrap();

    let task_id = accepted(
        manager
            .send_message(&session, &worker.id, "hang", CallMode::Async)
            .await
            .unwrap(),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = manager.remove_agent(&worker.id).unwrap_err();
    assert!(matches!(err, OrchestratorError::State(_)));

    let _ = manager.cancel_task(&task_id).unwrap();
    let _ = wait_status(&manager, &task_id, TaskStatus::Cancelled).await;
    manager.remove_agent(&worker.id).unwrap();
    assert!(manager.agent(&worker.id).is_none());
}
