//! Orchestrator error taxonomy.
//!
//! One `thiserror` enum covers every failure the core can surface.
//! Propagation policy:
//!
//! - [`Validation`](OrchestratorError::Validation),
//!   [`NotFound`](OrchestratorError::NotFound) and
//!   [`Permission`](OrchestratorError::Permission) are returned synchronously
//!   to the immediate caller.
//! - [`Timeout`](OrchestratorError::Timeout) and
//!   [`Upstream`](OrchestratorError::Upstream) land in a FAILED terminal task
//!   state and travel through the terminal-listener mechanism.
//! - [`IllegalTransition`](OrchestratorError::IllegalTransition) is an
//!   internal invariant violation: log it and degrade to `Upstream`, never
//!   crash the orchestrator.
//!
//! The core performs no automatic retries; retry policy belongs to callers.

use thiserror::Error;

/// Errors surfaced by the orchestration core.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Bad input shape or a missing required field.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Session, agent, or tool does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation is invalid for the current lifecycle state.
    #[error("Invalid state: {0}")]
    State(String),

    /// The target agent is not callable by the source agent.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// A second terminal listener was registered for the same task.
    #[error("Terminal listener already registered for task {0}")]
    DuplicateListener(String),

    /// The bridge exceeded the configured deadline for a task.
    #[error("Task deadline exceeded after {timeout_ms}ms")]
    Timeout {
        /// Configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The execution engine reported a failure or the transport faulted.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// The task state machine was asked to revisit or leave a settled state.
    #[error("Illegal task transition: {from} -> {to}")]
    IllegalTransition {
        /// Status the task was in.
        from: String,
        /// Status the caller attempted to move to.
        to: String,
    },
}

impl OrchestratorError {
    /// Error category string for structured logging.
    pub fn category(&self) -> &str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::State(_) => "state",
            Self::Permission(_) => "permission",
            Self::DuplicateListener(_) => "duplicate_listener",
            Self::Timeout { .. } => "timeout",
            Self::Upstream(_) => "upstream",
            Self::IllegalTransition { .. } => "illegal_transition",
        }
    }

    /// Whether the caller can meaningfully retry the operation.
    ///
    /// Timeouts and upstream faults may succeed on a fresh attempt; the
    /// synchronous failures are deterministic until the caller changes input
    /// or state.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Upstream(_))
    }

    /// Convert an invariant violation into the error callers may observe.
    ///
    /// [`IllegalTransition`](Self::IllegalTransition) must never escape the
    /// core as-is; it is logged at the call site and degraded here.
    #[must_use]
    pub fn degrade_invariant(self) -> Self {
        match self {
            Self::IllegalTransition { from, to } => {
                Self::Upstream(format!("task state machine violated ({from} -> {to})"))
            }
            other => other,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
