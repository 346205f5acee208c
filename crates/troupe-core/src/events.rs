//! Task event vocabulary.
//!
//! The execution engine streams typed chunks for each task; the bridge
//! republishes them verbatim as [`TaskEvent`]s on a per-task channel. A
//! well-formed stream carries any number of non-terminal events and ends with
//! exactly one terminal event ([`Done`](TaskEvent::Done) or
//! [`Error`](TaskEvent::Error)).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One streamed chunk of a task's execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Incremental assistant text.
    Text {
        /// Text fragment.
        text: String,
    },

    /// Incremental reasoning text.
    Thinking {
        /// Reasoning fragment.
        text: String,
    },

    /// The agent requested a tool invocation.
    ToolCall {
        /// Call ID echoed by the matching result.
        tool_call_id: String,
        /// Tool name.
        name: String,
        /// JSON arguments.
        arguments: Value,
    },

    /// A tool invocation finished.
    ToolResult {
        /// Call ID this result answers.
        tool_call_id: String,
        /// JSON result payload.
        result: Value,
    },

    /// Terminal: the engine reported failure.
    Error {
        /// Error description.
        message: String,
    },

    /// Terminal: the task succeeded.
    Done {
        /// Final aggregated text result.
        result: String,
    },
}

impl TaskEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }

    /// Wire tag for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
