//! # troupe-core
//!
//! Foundation types shared by every Troupe crate:
//!
//! - **Branded IDs**: `SessionId`, `AgentId`, `InstanceId`, `TaskId` as
//!   newtypes for type safety
//! - **Agents**: `AgentDefinition` templates and their per-session
//!   `AgentInstance` bindings
//! - **Config**: the `SessionConfig` wire schema handed to the execution
//!   engine, including the closed `SandboxPolicy` variant set
//! - **Events**: `TaskEvent` stream vocabulary republished by the bridge
//! - **History**: prior-turn records serialized per item for the engine
//! - **Errors**: the `OrchestratorError` taxonomy via `thiserror`

#![deny(unsafe_code)]

pub mod agents;
pub mod config;
pub mod errors;
pub mod events;
pub mod history;
pub mod ids;
