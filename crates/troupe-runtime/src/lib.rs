//! # troupe-runtime
//!
//! The top-level orchestration layer:
//!
//! - **Registry**: agent definitions and their per-session instances
//! - **Store**: the abstract session/history store with an in-memory
//!   implementation
//! - **Session manager**: the facade composing queue, bridge, and dispatcher
//!   into `open_session` / `spawn_agent` / `send_message` / `interrupt` /
//!   `close`
//! - **Settings**: JSON settings with deep merge and env overrides
//! - **Logging**: tracing initialization

#![deny(unsafe_code)]

pub mod logging;
pub mod registry;
pub mod session_manager;
pub mod settings;
pub mod store;

pub use registry::{AgentRegistry, DefinitionUpdate};
pub use session_manager::{OpenSessionParams, SendOutcome, SessionManager};
pub use settings::OrchestratorSettings;
pub use store::{InMemoryStore, SessionStore};
