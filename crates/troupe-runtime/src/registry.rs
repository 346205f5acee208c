//! Agent registry — definitions and their per-session instances.
//!
//! Definitions are immutable templates mutated only through
//! [`AgentRegistry::update_definition`]. Instantiation binds a definition to
//! one session, registers the instance's inbox with the task queue, and
//! indexes the agent name for `call_agent` resolution.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use troupe_core::agents::{AgentDefinition, AgentDirectory, AgentInstance, CallableTarget};
use troupe_core::config::ProviderType;
use troupe_core::errors::OrchestratorError;
use troupe_core::ids::{AgentId, InstanceId, SessionId};
use troupe_tasks::queue::TaskQueue;

/// Partial update applied to an existing definition.
#[derive(Clone, Debug, Default)]
pub struct DefinitionUpdate {
    /// New system prompt.
    pub system_prompt: Option<String>,
    /// New model (validated against the provider table).
    pub model: Option<String>,
    /// Enable or disable the agent.
    pub enabled: Option<bool>,
    /// Change caller permission.
    pub callable_by_others: Option<bool>,
    /// Replace the sub-agent list.
    pub sub_agents: Option<Vec<AgentId>>,
    /// Replace the tool list.
    pub tools: Option<Vec<String>>,
}

struct InstanceRecord {
    id: InstanceId,
    session_id: SessionId,
    definition_id: AgentId,
}

/// Owns agent definitions and instances; resolves lookups for the dispatcher.
pub struct AgentRegistry {
    definitions: DashMap<AgentId, AgentDefinition>,
    instances: DashMap<InstanceId, InstanceRecord>,
    names: DashMap<(SessionId, String), InstanceId>,
    queue: Arc<TaskQueue>,
}

impl AgentRegistry {
    /// Create a registry wired to the task queue.
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self {
            definitions: DashMap::new(),
            instances: DashMap::new(),
            names: DashMap::new(),
            queue,
        }
    }

    // ── Definitions ─────────────────────────────────────────────────────

    /// Register a definition.
    ///
    /// Rejects an empty name and a model no provider resolves.
    pub fn define(&self, definition: AgentDefinition) -> Result<AgentId, OrchestratorError> {
        if definition.name.trim().is_empty() {
            return Err(OrchestratorError::Validation("agent name is required".into()));
        }
        if ProviderType::for_model(&definition.model).is_none() {
            return Err(OrchestratorError::Validation(format!(
                "model '{}' cannot be resolved to a provider",
                definition.model
            )));
        }
        let id = definition.id.clone();
        debug!(agent_id = %id, name = %definition.name, model = %definition.model, "agent defined");
        let _ = self.definitions.insert(id.clone(), definition);
        Ok(id)
    }

    /// Fetch a definition by ID.
    pub fn definition(&self, id: &AgentId) -> Option<AgentDefinition> {
        self.definitions.get(id).map(|entry| entry.clone())
    }

    /// Apply an explicit update to a definition.
    pub fn update_definition(
        &self,
        id: &AgentId,
        update: DefinitionUpdate,
    ) -> Result<AgentDefinition, OrchestratorError> {
        if let Some(ref model) = update.model {
            if ProviderType::for_model(model).is_none() {
                return Err(OrchestratorError::Validation(format!(
                    "model '{model}' cannot be resolved to a provider"
                )));
            }
        }
        let mut entry = self
            .definitions
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("agent definition {id}")))?;
        let def = entry.value_mut();
        if let Some(prompt) = update.system_prompt {
            def.system_prompt = prompt;
        }
        if let Some(model) = update.model {
            def.model = model;
        }
        if let Some(enabled) = update.enabled {
            def.enabled = enabled;
        }
        if let Some(callable) = update.callable_by_others {
            def.callable_by_others = callable;
        }
        if let Some(sub_agents) = update.sub_agents {
            def.sub_agents = sub_agents;
        }
        if let Some(tools) = update.tools {
            def.tools = tools;
        }
        Ok(def.clone())
    }

    // ── Instances ───────────────────────────────────────────────────────

    /// Bind a definition to a session.
    ///
    /// Registers the instance's inbox with the task queue as a side effect.
    pub fn instantiate(
        &self,
        session_id: &SessionId,
        definition_id: &AgentId,
    ) -> Result<AgentInstance, OrchestratorError> {
        let definition = self
            .definition(definition_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("agent definition {definition_id}")))?;
        if !definition.enabled {
            return Err(OrchestratorError::State(format!(
                "agent '{}' is disabled",
                definition.name
            )));
        }

        let name_key = (session_id.clone(), definition.name.clone());
        if self.names.contains_key(&name_key) {
            return Err(OrchestratorError::Validation(format!(
                "an agent named '{}' already exists in this session",
                definition.name
            )));
        }

        let id = InstanceId::new();
        let record = InstanceRecord {
            id: id.clone(),
            session_id: session_id.clone(),
            definition_id: definition_id.clone(),
        };
        self.queue.register_agent(id.clone());
        let _ = self.instances.insert(id.clone(), record);
        let _ = self.names.insert(name_key, id.clone());

        debug!(instance_id = %id, session_id = %session_id, name = %definition.name, "agent instantiated");
        self.instance(&id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("agent instance {id}")))
    }

    /// Fetch an instance snapshot (definition + busy/idle state).
    pub fn instance(&self, id: &InstanceId) -> Option<AgentInstance> {
        let record = self.instances.get(id)?;
        self.snapshot(&record)
    }

    /// Remove an instance.
    ///
    /// Fails with a state error while the agent has a RUNNING task; drain
    /// first.
    pub fn remove(&self, id: &InstanceId) -> Result<(), OrchestratorError> {
        let (session_id, definition_id) = {
            let record = self
                .instances
                .get(id)
                .ok_or_else(|| OrchestratorError::NotFound(format!("agent instance {id}")))?;
            (record.session_id.clone(), record.definition_id.clone())
        };

        self.queue.unregister_agent(id)?;

        let _ = self.instances.remove(id);
        if let Some(def) = self.definition(&definition_id) {
            let _ = self.names.remove(&(session_id, def.name));
        }
        debug!(instance_id = %id, "agent instance removed");
        Ok(())
    }

    /// All instances bound to a session.
    pub fn instances_for_session(&self, session_id: &SessionId) -> Vec<AgentInstance> {
        self.instances
            .iter()
            .filter(|entry| entry.session_id == *session_id)
            .filter_map(|entry| self.snapshot(entry.value()))
            .collect()
    }

    fn snapshot(&self, record: &InstanceRecord) -> Option<AgentInstance> {
        let definition = self.definition(&record.definition_id)?;
        let state = self.queue.agent_state(&record.id).unwrap_or_default();
        Some(AgentInstance {
            id: record.id.clone(),
            session_id: record.session_id.clone(),
            definition: Arc::new(definition),
            state,
        })
    }
}

impl AgentDirectory for AgentRegistry {
    fn get(&self, id: &InstanceId) -> Option<AgentInstance> {
        self.instance(id)
    }

    fn resolve_by_name(&self, session_id: &SessionId, name: &str) -> Option<AgentInstance> {
        let id = self
            .names
            .get(&(session_id.clone(), name.to_owned()))
            .map(|entry| entry.clone())?;
        self.instance(&id)
    }

    fn callable_targets(
        &self,
        session_id: &SessionId,
        caller: Option<&InstanceId>,
    ) -> Vec<CallableTarget> {
        let caller_def = caller
            .and_then(|id| self.instance(id))
            .map(|instance| instance.definition);

        let mut targets: Vec<CallableTarget> = self
            .instances_for_session(session_id)
            .into_iter()
            .filter(|instance| Some(&instance.id) != caller)
            .filter(|instance| instance.definition.enabled)
            .filter(|instance| {
                instance.definition.callable_by_others
                    || caller_def
                        .as_ref()
                        .is_some_and(|d| d.sub_agents.contains(&instance.definition.id))
            })
            .map(|instance| CallableTarget {
                name: instance.definition.name.clone(),
                model: instance.definition.model.clone(),
            })
            .collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        targets
    }

    fn may_call(&self, caller: &InstanceId, target: &InstanceId) -> bool {
        let Some(target_instance) = self.instance(target) else {
            return false;
        };
        if !target_instance.definition.enabled {
            return false;
        }
        if target_instance.definition.callable_by_others {
            return true;
        }
        self.instance(caller).is_some_and(|caller_instance| {
            caller_instance
                .definition
                .sub_agents
                .contains(&target_instance.definition.id)
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
