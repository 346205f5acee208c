//! Tool dispatcher: the JSON-RPC request router.
//!
//! Resolves a tool name to either a local capability or the `call_agent`
//! indirection. Every outcome, including business failures, is wrapped in
//! the JSON-RPC envelope with the original request `id` echoed back.
//!
//! `call_agent` creates a task on the target agent's inbox. The default
//! (fast) path blocks on the task's terminal listener; the async path
//! returns a task handle immediately.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use troupe_core::agents::{AgentDirectory, CallableTarget};
use troupe_core::errors::OrchestratorError;
use troupe_core::ids::{InstanceId, SessionId, TaskId, ToolCallId};
use troupe_tasks::queue::{NewTask, TaskQueue};
use troupe_tasks::task::{TaskSource, TaskStatus};

use crate::protocol::{
    AGENT_NOT_FOUND, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
    JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND,
};
use crate::registry::{ToolContext, ToolRegistry, ToolSchema};

/// Name of the synthetic agent-to-agent indirection tool.
pub const CALL_AGENT: &str = "call_agent";

// ─────────────────────────────────────────────────────────────────────────────
// call_agent parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Whether `call_agent` blocks for the result or returns a task handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    /// Block until the target task settles (the fast path).
    #[default]
    Sync,
    /// Return `{task_id, status}` immediately.
    Async,
}

#[derive(Debug, Deserialize)]
struct CallAgentParams {
    target_name: String,
    message: String,
    #[serde(default)]
    mode: CallMode,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Routes `tools/list` and `tools/call` for one orchestrator.
pub struct ToolDispatcher {
    tools: RwLock<ToolRegistry>,
    agents: Arc<dyn AgentDirectory>,
    queue: Arc<TaskQueue>,
    sync_call_timeout: Duration,
}

impl ToolDispatcher {
    /// Create a dispatcher over the given registry and agent directory.
    pub fn new(
        tools: ToolRegistry,
        agents: Arc<dyn AgentDirectory>,
        queue: Arc<TaskQueue>,
        sync_call_timeout: Duration,
    ) -> Self {
        Self {
            tools: RwLock::new(tools),
            agents,
            queue,
            sync_call_timeout,
        }
    }

    /// Register an additional local tool after construction.
    pub fn register_tool(&self, tool: Arc<dyn crate::registry::Tool>) {
        self.tools.write().register(tool);
    }

    /// Whether a tool name is routable here (local capability or
    /// `call_agent`). The bridge uses this to decide which streamed tool
    /// calls re-enter the dispatcher.
    pub fn routes(&self, name: &str) -> bool {
        name == CALL_AGENT || self.tools.read().contains(name)
    }

    /// Handle one JSON-RPC request.
    ///
    /// Never fails outward: every error becomes an envelope with the request
    /// `id` preserved.
    pub async fn handle(
        &self,
        session_id: &SessionId,
        caller: Option<&InstanceId>,
        req: JsonRpcRequest,
    ) -> JsonRpcResponse {
        let id = req.id.clone();
        if req.jsonrpc != JSONRPC_VERSION {
            return JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                format!("unsupported jsonrpc version: {}", req.jsonrpc),
            );
        }

        match req.method.as_str() {
            "tools/list" => {
                let tools = self.visible_tools(session_id, caller);
                JsonRpcResponse::success(id, json!({ "tools": tools }))
            }
            "tools/call" => {
                let params: ToolCallParams = match req
                    .params
                    .ok_or_else(|| "missing params".to_owned())
                    .and_then(|p| serde_json::from_value(p).map_err(|e| e.to_string()))
                {
                    Ok(p) => p,
                    Err(message) => return JsonRpcResponse::error(id, INVALID_PARAMS, message),
                };

                debug!(tool = %params.name, session_id = %session_id, "tools/call");
                self.call_tool(session_id, caller, &params.name, params.arguments, id)
                    .await
            }
            other => {
                JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {other}"))
            }
        }
    }

    /// Route one named tool invocation and wrap the outcome.
    async fn call_tool(
        &self,
        session_id: &SessionId,
        caller: Option<&InstanceId>,
        name: &str,
        arguments: Value,
        id: Value,
    ) -> JsonRpcResponse {
        if name == CALL_AGENT {
            return match self.call_agent(session_id, caller, arguments).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(err) => {
                    let code = match &err {
                        OrchestratorError::NotFound(_) | OrchestratorError::Permission(_) => {
                            AGENT_NOT_FOUND
                        }
                        OrchestratorError::Validation(_) => INVALID_PARAMS,
                        _ => INTERNAL_ERROR,
                    };
                    JsonRpcResponse::error(id, code, err.to_string())
                }
            };
        }

        let tool = match self.tools.read().get(name) {
            Some(tool) => tool,
            None => {
                return JsonRpcResponse::error(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Unknown tool: {name}"),
                );
            }
        };

        let ctx = ToolContext {
            session_id: session_id.clone(),
            caller: caller.cloned(),
            tool_call_id: ToolCallId::new().into_inner(),
            cancellation: CancellationToken::new(),
        };
        match tool.invoke(arguments, &ctx).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => {
                let code = match &err {
                    OrchestratorError::Validation(_) => INVALID_PARAMS,
                    _ => INTERNAL_ERROR,
                };
                JsonRpcResponse::error(id, code, err.to_string())
            }
        }
    }

    // ── call_agent ──────────────────────────────────────────────────────

    /// Resolve and invoke another agent in the caller's session.
    async fn call_agent(
        &self,
        session_id: &SessionId,
        caller: Option<&InstanceId>,
        arguments: Value,
    ) -> Result<Value, OrchestratorError> {
        let params: CallAgentParams = serde_json::from_value(arguments)
            .map_err(|e| OrchestratorError::Validation(format!("call_agent params: {e}")))?;

        let target = self
            .agents
            .resolve_by_name(session_id, &params.target_name)
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!(
                    "AGENT_NOT_FOUND: no agent named '{}' in session",
                    params.target_name
                ))
            })?;

        let allowed = match caller {
            Some(caller_id) => self.agents.may_call(caller_id, &target.id),
            None => target.definition.callable_by_others,
        };
        if !allowed {
            return Err(OrchestratorError::Permission(format!(
                "AGENT_NOT_FOUND: agent '{}' is not callable by the requester",
                params.target_name
            )));
        }

        let task_id = TaskId::new();
        let new_task = NewTask {
            id: task_id.clone(),
            session_id: session_id.clone(),
            source: caller.map_or(TaskSource::User, |c| TaskSource::Agent(c.clone())),
            target: target.id.clone(),
            input: params.message,
        };

        match params.mode {
            CallMode::Async => {
                let snapshot = self.queue.submit(new_task)?;
                Ok(json!({
                    "task_id": snapshot.id,
                    "status": snapshot.status,
                }))
            }
            CallMode::Sync => {
                // Listener first: the fast path can settle before submit
                // returns.
                let rx = self.queue.listeners().wait(task_id.clone())?;
                if let Err(err) = self.queue.submit(new_task) {
                    let _ = self.queue.listeners().remove(&task_id);
                    return Err(err);
                }

                let settled = match tokio::time::timeout(self.sync_call_timeout, rx).await {
                    Ok(Ok(task)) => task,
                    Ok(Err(_)) => {
                        return Err(OrchestratorError::Upstream(
                            "terminal notification channel dropped".into(),
                        ));
                    }
                    Err(_) => {
                        warn!(task_id = %task_id, "synchronous call_agent timed out; cancelling");
                        let _ = self.queue.cancel(&task_id);
                        return Err(OrchestratorError::Timeout {
                            timeout_ms: self.sync_call_timeout.as_millis() as u64,
                        });
                    }
                };

                match settled.status {
                    TaskStatus::Completed => Ok(json!({
                        "task_id": settled.id,
                        "status": settled.status,
                        "result": settled.result.unwrap_or_default(),
                    })),
                    _ => Err(settled
                        .error
                        .map_or_else(
                            || OrchestratorError::Upstream("task failed without error".into()),
                            |failure| failure.to_error(),
                        )),
                }
            }
        }
    }

    // ── tools/list ──────────────────────────────────────────────────────

    /// Union of local schemas and the synthetic `call_agent` schema derived
    /// from the caller's sub-agent relationships.
    fn visible_tools(&self, session_id: &SessionId, caller: Option<&InstanceId>) -> Vec<ToolSchema> {
        let mut tools = self.tools.read().schemas();
        let targets = self.agents.callable_targets(session_id, caller);
        if !targets.is_empty() {
            tools.push(call_agent_schema(&targets));
        }
        tools
    }
}

/// Build the `call_agent` schema advertising the reachable targets.
fn call_agent_schema(targets: &[CallableTarget]) -> ToolSchema {
    let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
    ToolSchema {
        name: CALL_AGENT.to_owned(),
        description: format!(
            "Send a message to another agent in this session and return its reply. \
             Available agents: {}",
            names.join(", ")
        ),
        parameters: json!({
            "type": "object",
            "properties": {
                "target_name": {
                    "type": "string",
                    "description": "Name of the agent to call",
                    "enum": names,
                },
                "message": {
                    "type": "string",
                    "description": "Message for the target agent",
                },
                "mode": {
                    "type": "string",
                    "enum": ["sync", "async"],
                    "description": "sync blocks for the reply; async returns a task handle",
                },
            },
            "required": ["target_name", "message"],
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
