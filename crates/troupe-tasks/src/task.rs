//! Task record and status machine.
//!
//! Status transitions are monotonic: SUBMITTED → {QUEUED} → RUNNING →
//! {COMPLETED | FAILED | CANCELLED}. No state repeats and terminal states
//! accept nothing further; violations surface as
//! [`OrchestratorError::IllegalTransition`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use troupe_core::errors::OrchestratorError;
use troupe_core::ids::{InstanceId, SessionId, TaskId};

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, not yet routed.
    Submitted,
    /// Waiting in the target agent's inbox.
    Queued,
    /// Executing on the bridge.
    Running,
    /// Terminal: finished with a result.
    Completed,
    /// Terminal: finished with an error (timeout or upstream).
    Failed,
    /// Terminal: cancelled before or during execution.
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transition is permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the machine permits moving from `self` to `to`.
    pub fn can_transition(&self, to: Self) -> bool {
        match self {
            Self::Submitted => matches!(to, Self::Queued | Self::Running | Self::Cancelled),
            Self::Queued => matches!(to, Self::Running | Self::Cancelled),
            Self::Running => matches!(to, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }

    /// Wire string for logging.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Submitted => "submitted",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures
// ─────────────────────────────────────────────────────────────────────────────

/// Why a task reached FAILED (or, for bookkeeping, CANCELLED).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The configured deadline expired before the engine finished.
    Timeout,
    /// The engine reported failure or the transport faulted.
    Upstream,
    /// Teardown after an external cancel request.
    Cancelled,
}

/// Error payload attached to a task in a terminal failure state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Failure classification; timeouts stay distinguishable from upstream
    /// faults.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
}

impl TaskFailure {
    /// A deadline failure.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!("deadline exceeded after {timeout_ms}ms"),
        }
    }

    /// An engine/transport failure.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Upstream,
            message: message.into(),
        }
    }

    /// Convert into the error surfaced to synchronous callers.
    pub fn to_error(&self) -> OrchestratorError {
        match self.kind {
            FailureKind::Timeout => {
                // The millisecond figure is embedded in the message; callers
                // only branch on the variant.
                OrchestratorError::Timeout { timeout_ms: 0 }
            }
            FailureKind::Upstream => OrchestratorError::Upstream(self.message.clone()),
            FailureKind::Cancelled => {
                OrchestratorError::State(format!("task cancelled: {}", self.message))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task
// ─────────────────────────────────────────────────────────────────────────────

/// Who asked for this task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    /// Direct user message through the session manager.
    User,
    /// Another agent instance via `call_agent`.
    Agent(InstanceId),
}

/// One asynchronous unit of work: an agent invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    /// Task ID.
    pub id: TaskId,
    /// Monotonic submission counter; breaks FIFO ties within one inbox.
    pub seq: u64,
    /// Session this task belongs to.
    pub session_id: SessionId,
    /// Requesting party.
    pub source: TaskSource,
    /// Agent instance that will execute the task.
    pub target: InstanceId,
    /// Input payload (the message for the target agent).
    pub input: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Final text result (COMPLETED only).
    pub result: Option<String>,
    /// Failure payload (FAILED, and CANCELLED for bookkeeping).
    pub error: Option<TaskFailure>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last status change.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Apply a status transition, refreshing `updated_at`.
    ///
    /// Rejects anything the machine forbids with `IllegalTransition`.
    pub fn transition(&mut self, to: TaskStatus) -> Result<(), OrchestratorError> {
        if !self.status.can_transition(to) {
            return Err(OrchestratorError::IllegalTransition {
                from: self.status.as_str().to_owned(),
                to: to.as_str().to_owned(),
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
