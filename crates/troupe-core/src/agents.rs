//! Agent data model: definitions, instances, sessions.
//!
//! An [`AgentDefinition`] is the immutable template (prompt, model, caller
//! permissions, sub-agent wiring). An [`AgentInstance`] binds a definition to
//! one session and carries the runtime busy/idle state mirrored from its task
//! inbox. A [`Session`] owns an ordered list of instances.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{AgentId, InstanceId, SessionId};

// ─────────────────────────────────────────────────────────────────────────────
// Definitions
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable agent template.
///
/// Mutation happens only through the registry's explicit update operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Definition ID.
    pub id: AgentId,
    /// Unique (per session) agent name used by `call_agent`.
    pub name: String,
    /// Base system prompt.
    pub system_prompt: String,
    /// Model ID this agent runs on.
    pub model: String,
    /// Disabled agents cannot be instantiated.
    pub enabled: bool,
    /// Whether any agent in the session may call this one.
    pub callable_by_others: bool,
    /// Definitions this agent may call as tools even when they are not
    /// callable by others.
    #[serde(default)]
    pub sub_agents: Vec<AgentId>,
    /// Names of local tools exposed to this agent.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Free-form configuration passed through to the engine.
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl AgentDefinition {
    /// Minimal definition with the given name and model.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            system_prompt: String::new(),
            model: model.into(),
            enabled: true,
            callable_by_others: false,
            sub_agents: vec![],
            tools: vec![],
            config: Map::new(),
        }
    }

    /// Builder-style system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Builder-style caller permission.
    #[must_use]
    pub fn callable(mut self, callable: bool) -> Self {
        self.callable_by_others = callable;
        self
    }

    /// Builder-style sub-agent wiring.
    #[must_use]
    pub fn with_sub_agents(mut self, sub_agents: Vec<AgentId>) -> Self {
        self.sub_agents = sub_agents;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Instances
// ─────────────────────────────────────────────────────────────────────────────

/// Busy/idle state of an agent instance.
///
/// Mirrors the instance's task inbox: `Busy` exactly while one task is
/// RUNNING. At most one task runs per instance at any instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// No task running; the next submission dispatches immediately.
    #[default]
    Idle,
    /// One task is running; submissions queue behind it.
    Busy,
}

/// Runtime binding of an [`AgentDefinition`] to a [`Session`].
#[derive(Clone, Debug)]
pub struct AgentInstance {
    /// Instance ID (task target).
    pub id: InstanceId,
    /// Owning session; an instance belongs to exactly one.
    pub session_id: SessionId,
    /// The template this instance was created from.
    pub definition: Arc<AgentDefinition>,
    /// Busy/idle snapshot at lookup time.
    pub state: AgentState,
}

/// One agent another agent may target with `call_agent`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallableTarget {
    /// Agent name to pass as `target_name`.
    pub name: String,
    /// Model the target runs on.
    pub model: String,
}

/// Read-side lookup surface the tool dispatcher needs from the agent
/// registry. Kept as a trait so the MCP layer does not depend on the runtime
/// crate.
pub trait AgentDirectory: Send + Sync {
    /// Look up an instance by ID.
    fn get(&self, id: &InstanceId) -> Option<AgentInstance>;

    /// Resolve an instance by agent name within a session.
    fn resolve_by_name(&self, session_id: &SessionId, name: &str) -> Option<AgentInstance>;

    /// Targets the caller is allowed to reach with `call_agent`.
    ///
    /// With no caller (a user-level listing) this is every enabled
    /// `callable_by_others` agent in the session.
    fn callable_targets(
        &self,
        session_id: &SessionId,
        caller: Option<&InstanceId>,
    ) -> Vec<CallableTarget>;

    /// Whether `caller` may invoke `target` (callable-by-others, or an
    /// explicit sub-agent of the caller's definition).
    fn may_call(&self, caller: &InstanceId, target: &InstanceId) -> bool;
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Session lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accepting agents and tasks.
    #[default]
    Active,
    /// Logically destroyed; accepts nothing.
    Closed,
}

/// A user-scoped collaboration context containing agent instances.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// Session ID.
    pub id: SessionId,
    /// Owning user.
    pub user_id: String,
    /// Display title.
    pub title: String,
    /// Instances in creation order.
    pub agents: Vec<InstanceId>,
    /// Lifecycle state.
    pub state: SessionState,
    /// Sandbox policy every task in this session inherits.
    pub sandbox_policy: crate::config::SandboxPolicy,
    /// Working directory for engine-side execution.
    pub cwd: std::path::PathBuf,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Last mutation timestamp.
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Session {
    /// Create an active session for a user.
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: SessionId::new(),
            user_id: user_id.into(),
            title: title.into(),
            agents: vec![],
            state: SessionState::Active,
            sandbox_policy: crate::config::SandboxPolicy::default(),
            cwd: std::path::PathBuf::from("/tmp"),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the session still accepts work.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
