//! Session manager — the top-level orchestration facade.
//!
//! Composes the agent registry, per-agent task queue, tool dispatcher, and
//! execution bridge into `open_session` / `spawn_agent` / `send_message` /
//! `interrupt` / `close`. Construction wires the two deliberate cycles
//! through late-injection seams: the queue dispatches promoted tasks into the
//! bridge, and the bridge re-enters the dispatcher for streamed `call_agent`
//! events.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use troupe_bridge::bridge::{BridgeConfig, ExecutionBridge, ToolRouter};
use troupe_bridge::engine::{ExecutionEngine, RealtimeInputStream, TaskEventStream};
use troupe_core::agents::{AgentDefinition, AgentInstance, Session, SessionState};
use troupe_core::config::{
    ApprovalPolicy, McpServerConfig, ProviderInfo, ProviderType, ReasoningEffort, SandboxPolicy,
    SessionConfig,
};
use troupe_core::errors::OrchestratorError;
use troupe_core::events::TaskEvent;
use troupe_core::history::HistoryItem;
use troupe_core::ids::{InstanceId, SessionId, TaskId};
use troupe_mcp::dispatcher::{CallMode, ToolDispatcher};
use troupe_mcp::protocol::{INTERNAL_ERROR, JsonRpcRequest, JsonRpcResponse};
use troupe_mcp::registry::ToolRegistry;
use troupe_tasks::listeners::TerminalListenerRegistry;
use troupe_tasks::queue::{NewTask, TaskDispatcher, TaskObserver, TaskOutcome, TaskQueue};
use troupe_tasks::task::{Task, TaskFailure, TaskSource, TaskStatus};

use crate::registry::AgentRegistry;
use crate::settings::OrchestratorSettings;
use crate::store::SessionStore;

/// `session_source` value stamped into every engine config.
const SESSION_SOURCE: &str = "troupe";

// ─────────────────────────────────────────────────────────────────────────────
// Facade types
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for opening a session.
#[derive(Clone, Debug)]
pub struct OpenSessionParams {
    /// Owning user.
    pub user_id: String,
    /// Display title.
    pub title: String,
    /// Sandbox policy every task in the session inherits.
    pub sandbox_policy: SandboxPolicy,
    /// Working directory for engine-side execution.
    pub cwd: PathBuf,
}

impl OpenSessionParams {
    /// Parameters with the default (read-only) sandbox.
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            title: title.into(),
            sandbox_policy: SandboxPolicy::default(),
            cwd: PathBuf::from("/tmp"),
        }
    }
}

/// What `send_message` produced.
#[derive(Debug)]
pub enum SendOutcome {
    /// The synchronous path: the settled task with its result.
    Completed {
        /// Final task snapshot (status COMPLETED).
        task: Task,
    },
    /// The asynchronous path: a handle to the accepted task.
    Accepted {
        /// ID to watch via the task accessors or event subscription.
        task_id: TaskId,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionManager
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level orchestrator.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    agents: Arc<AgentRegistry>,
    queue: Arc<TaskQueue>,
    bridge: Arc<ExecutionBridge>,
    dispatcher: Arc<ToolDispatcher>,
    settings: OrchestratorSettings,
}

impl SessionManager {
    /// Construct and wire the orchestration core.
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        store: Arc<dyn SessionStore>,
        tools: ToolRegistry,
        settings: OrchestratorSettings,
    ) -> Arc<Self> {
        let listeners = Arc::new(TerminalListenerRegistry::new());
        let queue = Arc::new(TaskQueue::new(listeners));
        let agents = Arc::new(AgentRegistry::new(queue.clone()));
        let bridge = Arc::new(ExecutionBridge::new(
            engine,
            queue.clone(),
            BridgeConfig {
                task_timeout: settings.task_timeout(),
                event_capacity: settings.event_channel_capacity,
            },
        ));
        let dispatcher = Arc::new(ToolDispatcher::new(
            tools,
            agents.clone(),
            queue.clone(),
            settings.sync_call_timeout(),
        ));

        bridge.set_tool_router(Arc::new(DispatcherRouter {
            dispatcher: dispatcher.clone(),
        }));
        queue.set_dispatcher(Arc::new(TaskRunner {
            store: store.clone(),
            agents: agents.clone(),
            bridge: bridge.clone(),
            queue: queue.clone(),
        }));
        queue.set_observer(Arc::new(HistoryRecorder {
            store: store.clone(),
        }));

        Arc::new(Self {
            store,
            agents,
            queue,
            bridge,
            dispatcher,
            settings,
        })
    }

    // ── Session lifecycle ───────────────────────────────────────────────

    /// Open a new session for a user.
    #[instrument(skip(self, params), fields(user_id = %params.user_id))]
    pub fn open_session(&self, params: OpenSessionParams) -> SessionId {
        let mut session = Session::new(params.user_id, params.title);
        session.sandbox_policy = params.sandbox_policy;
        session.cwd = params.cwd;
        let id = session.id.clone();
        self.store.insert_session(session);
        info!(session_id = %id, "session opened");
        id
    }

    /// Define an agent and bind it to the session.
    pub fn spawn_agent(
        &self,
        session_id: &SessionId,
        definition: AgentDefinition,
    ) -> Result<AgentInstance, OrchestratorError> {
        let session = self.require_active(session_id)?;
        let agent_id = self.agents.define(definition)?;
        let instance = self.agents.instantiate(session_id, &agent_id)?;
        self.store.push_agent(&session.id, instance.id.clone())?;
        info!(session_id = %session_id, instance_id = %instance.id, name = %instance.definition.name, "agent spawned");
        Ok(instance)
    }

    /// Send a message to one of the session's agents.
    ///
    /// `CallMode::Sync` blocks for the settled task (bounded by the
    /// configured deadline); `CallMode::Async` returns a task handle.
    pub async fn send_message(
        &self,
        session_id: &SessionId,
        agent_id: &InstanceId,
        text: impl Into<String>,
        mode: CallMode,
    ) -> Result<SendOutcome, OrchestratorError> {
        let _ = self.require_active(session_id)?;
        let instance = self
            .agents
            .instance(agent_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("agent instance {agent_id}")))?;
        if instance.session_id != *session_id {
            return Err(OrchestratorError::Validation(format!(
                "agent {agent_id} belongs to a different session"
            )));
        }

        let task_id = TaskId::new();
        let new_task = NewTask {
            id: task_id.clone(),
            session_id: session_id.clone(),
            source: TaskSource::User,
            target: agent_id.clone(),
            input: text.into(),
        };

        match mode {
            CallMode::Async => {
                let snapshot = self.queue.submit(new_task)?;
                debug!(task_id = %snapshot.id, "message accepted");
                Ok(SendOutcome::Accepted {
                    task_id: snapshot.id,
                })
            }
            CallMode::Sync => {
                // Listener before submit: the fast path can settle before
                // submit returns.
                let rx = self.queue.listeners().wait(task_id.clone())?;
                if let Err(err) = self.queue.submit(new_task) {
                    let _ = self.queue.listeners().remove(&task_id);
                    return Err(err);
                }

                let settled = match tokio::time::timeout(self.settings.sync_call_timeout(), rx).await
                {
                    Ok(Ok(task)) => task,
                    Ok(Err(_)) => {
                        return Err(OrchestratorError::Upstream(
                            "terminal notification channel dropped".into(),
                        ));
                    }
                    Err(_) => {
                        warn!(task_id = %task_id, "synchronous send timed out; cancelling");
                        let _ = self.queue.cancel(&task_id);
                        return Err(OrchestratorError::Timeout {
                            timeout_ms: self.settings.sync_call_timeout_ms,
                        });
                    }
                };

                match settled.status {
                    TaskStatus::Completed => Ok(SendOutcome::Completed { task: settled }),
                    _ => Err(settled.error.map_or_else(
                        || OrchestratorError::Upstream("task failed without error".into()),
                        |failure| failure.to_error(),
                    )),
                }
            }
        }
    }

    /// Cancel every RUNNING task owned by the session's agents.
    ///
    /// Queued tasks stay queued and will promote once their agent frees up.
    pub fn interrupt(&self, session_id: &SessionId) -> Result<usize, OrchestratorError> {
        let _ = self
            .store
            .get_session(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("session {session_id}")))?;

        let mut signalled = 0;
        for instance in self.agents.instances_for_session(session_id) {
            if let Some(task_id) = self.queue.running_task(&instance.id) {
                match self.queue.cancel(&task_id) {
                    Ok(_) => signalled += 1,
                    Err(err) => {
                        warn!(task_id = %task_id, error = %err, "interrupt cancel failed");
                    }
                }
            }
        }
        info!(session_id = %session_id, signalled, "session interrupted");
        Ok(signalled)
    }

    /// Close a session: cancel all of its pending/running tasks and mark it
    /// CLOSED. Closing twice is a no-op.
    pub fn close(&self, session_id: &SessionId) -> Result<(), OrchestratorError> {
        let session = self
            .store
            .get_session(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("session {session_id}")))?;
        if session.state == SessionState::Closed {
            debug!(session_id = %session_id, "close on an already-closed session");
            return Ok(());
        }

        let cancelled = self.queue.cancel_all_for_session(session_id);
        self.store
            .set_session_state(session_id, SessionState::Closed)?;
        info!(session_id = %session_id, cancelled, "session closed");
        Ok(())
    }

    // ── MCP boundary ────────────────────────────────────────────────────

    /// Handle one JSON-RPC tool request scoped by the session header.
    pub async fn handle_tool_request(
        &self,
        session_id: &SessionId,
        caller: Option<&InstanceId>,
        req: JsonRpcRequest,
    ) -> JsonRpcResponse {
        match self.store.get_session(session_id) {
            None => JsonRpcResponse::error(
                req.id.clone(),
                INTERNAL_ERROR,
                format!("Not found: session {session_id}"),
            ),
            Some(session) if !session.is_active() => JsonRpcResponse::error(
                req.id.clone(),
                INTERNAL_ERROR,
                format!("Invalid state: session {session_id} is closed"),
            ),
            Some(_) => self.dispatcher.handle(session_id, caller, req).await,
        }
    }

    /// Register an additional local tool.
    pub fn register_tool(&self, tool: Arc<dyn troupe_mcp::registry::Tool>) {
        self.dispatcher.register_tool(tool);
    }

    /// Open a duplex realtime exchange for a session.
    pub async fn open_realtime(
        &self,
        session_id: &SessionId,
        inbound: RealtimeInputStream,
    ) -> Result<TaskEventStream, OrchestratorError> {
        let _ = self.require_active(session_id)?;
        self.bridge
            .open_realtime(session_id.clone(), inbound)
            .await
            .map_err(|err| OrchestratorError::Upstream(err.to_string()))
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// Session snapshot.
    pub fn session(&self, session_id: &SessionId) -> Option<Session> {
        self.store.get_session(session_id)
    }

    /// Sessions owned by a user, newest first.
    pub fn sessions_for_user(&self, user_id: &str) -> Vec<Session> {
        self.store.list_sessions(user_id)
    }

    /// Agent instance snapshot.
    pub fn agent(&self, instance_id: &InstanceId) -> Option<AgentInstance> {
        self.agents.instance(instance_id)
    }

    /// Remove an agent instance (fails while it has a running task).
    pub fn remove_agent(&self, instance_id: &InstanceId) -> Result<(), OrchestratorError> {
        self.agents.remove(instance_id)
    }

    /// Task snapshot.
    pub fn task(&self, task_id: &TaskId) -> Option<Task> {
        self.queue.get(task_id)
    }

    /// Cancel one task.
    pub fn cancel_task(&self, task_id: &TaskId) -> Result<Task, OrchestratorError> {
        self.queue.cancel(task_id).map_err(|err| {
            warn!(task_id = %task_id, error = %err, "cancel rejected");
            err.degrade_invariant()
        })
    }

    /// Subscribe to a task's event stream.
    pub fn subscribe_task(&self, task_id: &TaskId) -> tokio::sync::broadcast::Receiver<TaskEvent> {
        self.bridge.subscribe(task_id)
    }

    /// An agent instance's conversation history.
    pub fn history(&self, instance_id: &InstanceId) -> Vec<HistoryItem> {
        self.store.history(instance_id)
    }

    /// The agent registry.
    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    // ── Maintenance ─────────────────────────────────────────────────────

    /// Start the background eviction sweep; cancel the returned token to
    /// stop it.
    pub fn start_eviction(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let guard = token.clone();
        let queue = self.queue.clone();
        let interval = self.settings.eviction_interval();
        let retention = self.settings.task_retention();
        let _ = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = guard.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = queue.evict_expired(retention);
                        if evicted > 0 {
                            debug!(evicted, "settled tasks evicted");
                        }
                    }
                }
            }
        });
        token
    }

    /// Evict settled tasks past the retention window once, returning the
    /// eviction count.
    pub fn evict_settled_tasks(&self) -> usize {
        self.queue.evict_expired(self.settings.task_retention())
    }

    // ── Internal ────────────────────────────────────────────────────────

    fn require_active(&self, session_id: &SessionId) -> Result<Session, OrchestratorError> {
        let session = self
            .store
            .get_session(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("session {session_id}")))?;
        if !session.is_active() {
            return Err(OrchestratorError::State(format!(
                "session {session_id} is closed"
            )));
        }
        Ok(session)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring adapters
// ─────────────────────────────────────────────────────────────────────────────

/// Queue → bridge: build the engine config and start the run.
struct TaskRunner {
    store: Arc<dyn SessionStore>,
    agents: Arc<AgentRegistry>,
    bridge: Arc<ExecutionBridge>,
    queue: Arc<TaskQueue>,
}

impl TaskRunner {
    fn fail(&self, task_id: &TaskId, message: &str) {
        warn!(task_id = %task_id, message, "task failed before dispatch");
        if let Err(err) = self.queue.finish(
            task_id,
            TaskOutcome::Failed(TaskFailure::upstream(message)),
        ) {
            warn!(task_id = %task_id, error = %err, "could not settle undispatchable task");
        }
    }
}

impl TaskDispatcher for TaskRunner {
    fn dispatch(&self, task: Task) {
        let Some(instance) = self.agents.instance(&task.target) else {
            self.fail(&task.id, "agent instance disappeared before dispatch");
            return;
        };
        let Some(session) = self.store.get_session(&task.session_id) else {
            self.fail(&task.id, "session disappeared before dispatch");
            return;
        };

        let config = build_session_config(&instance, &session);
        // Prior turns only; the new input rides the payload and is recorded
        // as a turn for the next dispatch.
        let history = self.store.history(&task.target);
        self.store
            .append_history(&task.target, HistoryItem::user(task.input.clone()));
        self.bridge.spawn_run(task, config, history);
    }
}

/// Terminal observer: record results into the target's history.
struct HistoryRecorder {
    store: Arc<dyn SessionStore>,
}

impl TaskObserver for HistoryRecorder {
    fn on_terminal(&self, task: &Task) {
        if task.status == TaskStatus::Completed {
            if let Some(result) = &task.result {
                self.store
                    .append_history(&task.target, HistoryItem::assistant(result.clone()));
            }
        }
        self.store.touch(&task.session_id);
    }
}

/// Bridge → dispatcher: streamed tool calls re-enter the protocol layer.
struct DispatcherRouter {
    dispatcher: Arc<ToolDispatcher>,
}

#[async_trait]
impl ToolRouter for DispatcherRouter {
    fn routes(&self, name: &str) -> bool {
        self.dispatcher.routes(name)
    }

    async fn route(
        &self,
        session_id: &SessionId,
        caller: &InstanceId,
        tool_call_id: &str,
        name: &str,
        arguments: Value,
    ) -> Value {
        let req = JsonRpcRequest::new(
            json!(tool_call_id),
            "tools/call",
            Some(json!({"name": name, "arguments": arguments})),
        );
        let resp = self.dispatcher.handle(session_id, Some(caller), req).await;
        match (resp.result, resp.error) {
            (Some(result), _) => result,
            (None, Some(err)) => json!({"error": {"code": err.code, "message": err.message}}),
            (None, None) => json!({"error": {"message": "empty dispatcher response"}}),
        }
    }
}

/// Resolve the engine config for one task from its agent and session.
fn build_session_config(instance: &AgentInstance, session: &Session) -> SessionConfig {
    let def = instance.definition.as_ref();
    let provider_type = ProviderType::for_model(&def.model).unwrap_or(ProviderType::Anthropic);
    let mcp_servers: BTreeMap<String, McpServerConfig> = def
        .config
        .get("mcp_servers")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let model_reasoning_effort: Option<ReasoningEffort> = def
        .config
        .get("reasoning_effort")
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    SessionConfig {
        provider: ProviderInfo::bare(provider_type),
        model: def.model.clone(),
        model_reasoning_effort,
        model_reasoning_summary: None,
        developer_instructions: None,
        user_instructions: None,
        base_instructions: (!def.system_prompt.is_empty()).then(|| def.system_prompt.clone()),
        compact_prompt: None,
        approval_policy: ApprovalPolicy::default(),
        sandbox_policy: session.sandbox_policy.clone(),
        cwd: session.cwd.clone(),
        session_source: Some(SESSION_SOURCE.to_owned()),
        mcp_servers,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use assert_matches::assert_matches;
    use futures::stream;
    use troupe_bridge::engine::{EngineError, TaskPayload};

    /// Engine that completes every task with an echo of its input.
    struct EchoEngine;

    #[async_trait]
    impl ExecutionEngine for EchoEngine {
        async fn run_task(&self, payload: TaskPayload) -> Result<TaskEventStream, EngineError> {
            let reply = format!("echo: {}", payload.input);
            Ok(Box::pin(stream::iter(vec![
                Ok(TaskEvent::Text { text: reply.clone() }),
                Ok(TaskEvent::Done { result: reply }),
            ])))
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
            Arc::new(EchoEngine),
            Arc::new(InMemoryStore::new()),
            ToolRegistry::new(),
            OrchestratorSettings::default(),
        )
    }

    fn agent_def(name: &str) -> AgentDefinition {
        AgentDefinition::new(name, "claude-sonnet-4").with_system_prompt("be helpful")
    }

    #[tokio::test]
    async fn open_and_inspect_session() {
        let manager = make_manager();
        let session_id = manager.open_session(OpenSessionParams::new("alice", "workbench"));

        let session = manager.session(&session_id).unwrap();
        assert_eq!(session.user_id, "alice");
        assert!(session.is_active());
        assert_eq!(manager.sessions_for_user("alice").len(), 1);
    }

    #[tokio::test]
    async fn spawn_agent_binds_to_session() {
        let manager = make_manager();
        let session_id = manager.open_session(OpenSessionParams::new("alice", "w"));
        let instance = manager.spawn_agent(&session_id, agent_def("helper")).unwrap();

        assert_eq!(instance.session_id, session_id);
        let session = manager.session(&session_id).unwrap();
        assert_eq!(session.agents, vec![instance.id]);
    }

    #[tokio::test]
    async fn sync_send_returns_result_and_records_history() {
        let manager = make_manager();
        let session_id = manager.open_session(OpenSessionParams::new("alice", "w"));
        let instance = manager.spawn_agent(&session_id, agent_def("helper")).unwrap();

        let outcome = manager
            .send_message(&session_id, &instance.id, "hello", CallMode::Sync)
            .await
            .unwrap();
        let task = match outcome {
            SendOutcome::Completed { task } => task,
            SendOutcome::Accepted { .. } => panic!("sync send must complete"),
        };
        assert_eq!(task.result.as_deref(), Some("echo: hello"));

        let history = manager.history(&instance.id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].content, "echo: hello");
    }

    #[tokio::test]
    async fn send_to_unknown_session_or_agent() {
        let manager = make_manager();
        let session_id = manager.open_session(OpenSessionParams::new("alice", "w"));

        let err = manager
            .send_message(&SessionId::new(), &InstanceId::new(), "x", CallMode::Sync)
            .await
            .unwrap_err();
        assert_matches!(err, OrchestratorError::NotFound(_));

        let err = manager
            .send_message(&session_id, &InstanceId::new(), "x", CallMode::Sync)
            .await
            .unwrap_err();
        assert_matches!(err, OrchestratorError::NotFound(_));
    }

    #[tokio::test]
    async fn agent_from_other_session_rejected() {
        let manager = make_manager();
        let s1 = manager.open_session(OpenSessionParams::new("alice", "one"));
        let s2 = manager.open_session(OpenSessionParams::new("alice", "two"));
        let instance = manager.spawn_agent(&s1, agent_def("helper")).unwrap();

        let err = manager
            .send_message(&s2, &instance.id, "x", CallMode::Sync)
            .await
            .unwrap_err();
        assert_matches!(err, OrchestratorError::Validation(_));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_sends() {
        let manager = make_manager();
        let session_id = manager.open_session(OpenSessionParams::new("alice", "w"));
        let instance = manager.spawn_agent(&session_id, agent_def("helper")).unwrap();

        manager.close(&session_id).unwrap();
        manager.close(&session_id).unwrap();
        assert_eq!(manager.session(&session_id).unwrap().state, SessionState::Closed);

        let err = manager
            .send_message(&session_id, &instance.id, "too late", CallMode::Sync)
            .await
            .unwrap_err();
        assert_matches!(err, OrchestratorError::State(_));

        let err = manager.spawn_agent(&session_id, agent_def("latecomer")).unwrap_err();
        assert_matches!(err, OrchestratorError::State(_));
    }

    #[tokio::test]
    async fn tool_request_scoped_by_session_header() {
        let manager = make_manager();
        let session_id = manager.open_session(OpenSessionParams::new("alice", "w"));
        let _ = manager
            .spawn_agent(&session_id, agent_def("helper").callable(true))
            .unwrap();

        let req = JsonRpcRequest::new(json!(1), "tools/list", None);
        let resp = manager.handle_tool_request(&session_id, None, req).await;
        let tools = resp.result.unwrap()["tools"].as_array().unwrap().clone();
        assert!(tools.iter().any(|t| t["name"] == "call_agent"));

        // Unknown session still gets an envelope, not a transport failure
        let req = JsonRpcRequest::new(json!(2), "tools/list", None);
        let resp = manager.handle_tool_request(&SessionId::new(), None, req).await;
        assert_eq!(resp.id, json!(2));
        assert!(resp.error.unwrap().message.contains("Not found"));

        // Closed session rejects tool traffic
        manager.close(&session_id).unwrap();
        let req = JsonRpcRequest::new(json!(3), "tools/list", None);
        let resp = manager.handle_tool_request(&session_id, None, req).await;
        assert!(resp.error.unwrap().message.contains("closed"));
    }

    #[tokio::test]
    async fn session_config_resolution() {
        let manager = make_manager();
        let mut params = OpenSessionParams::new("alice", "w");
        params.sandbox_policy = SandboxPolicy::WorkspaceWrite {
            writable_roots: vec![PathBuf::from("/work")],
            network_access: false,
        };
        params.cwd = PathBuf::from("/work/project");
        let session_id = manager.open_session(params);
        let instance = manager.spawn_agent(&session_id, agent_def("helper")).unwrap();

        let session = manager.session(&session_id).unwrap();
        let config = build_session_config(&instance, &session);
        assert_eq!(config.model, "claude-sonnet-4");
        assert_eq!(config.provider.provider_type, ProviderType::Anthropic);
        assert_eq!(config.base_instructions.as_deref(), Some("be helpful"));
        assert_eq!(config.cwd, PathBuf::from("/work/project"));
        assert_matches!(config.sandbox_policy, SandboxPolicy::WorkspaceWrite { .. });
        assert_eq!(config.session_source.as_deref(), Some(SESSION_SOURCE));
    }

    #[tokio::test]
    async fn session_config_reads_agent_config_map() {
        let manager = make_manager();
        let session_id = manager.open_session(OpenSessionParams::new("alice", "w"));

        let mut def = agent_def("tuned");
        let _ = def.config.insert("reasoning_effort".into(), json!("high"));
        let _ = def.config.insert(
            "mcp_servers".into(),
            json!({"search": {"command": "mcp-search", "args": ["--stdio"]}}),
        );
        let instance = manager.spawn_agent(&session_id, def).unwrap();

        let session = manager.session(&session_id).unwrap();
        let config = build_session_config(&instance, &session);
        assert_eq!(config.model_reasoning_effort, Some(ReasoningEffort::High));
        assert!(config.mcp_servers.contains_key("search"));
    }

    #[tokio::test]
    async fn evict_settled_tasks_once() {
        let manager = SessionManager::new(
            Arc::new(EchoEngine),
            Arc::new(InMemoryStore::new()),
            ToolRegistry::new(),
            OrchestratorSettings {
                task_retention_secs: 0,
                ..Default::default()
            },
        );
        let session_id = manager.open_session(OpenSessionParams::new("alice", "w"));
        let instance = manager.spawn_agent(&session_id, agent_def("helper")).unwrap();

        let outcome = manager
            .send_message(&session_id, &instance.id, "hi", CallMode::Sync)
            .await
            .unwrap();
        let task = match outcome {
            SendOutcome::Completed { task } => task,
            SendOutcome::Accepted { .. } => unreachable!(),
        };

        assert!(manager.task(&task.id).is_some());
        let evicted = manager.evict_settled_tasks();
        assert_eq!(evicted, 1);
        assert!(manager.task(&task.id).is_none());
    }
}
