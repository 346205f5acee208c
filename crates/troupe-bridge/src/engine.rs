//! Execution engine contract.
//!
//! The engine is an external component reached only through this trait: it
//! performs model inference and engine-side tool execution, streaming typed
//! events back. A well-formed response stream ends in exactly one terminal
//! event (`done` or `error`).

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use troupe_core::config::SessionConfig;
use troupe_core::events::TaskEvent;
use troupe_core::history::HistoryItem;
use troupe_core::ids::SessionId;

/// Boxed stream of [`TaskEvent`]s returned by the engine.
pub type TaskEventStream = Pin<Box<dyn Stream<Item = Result<TaskEvent, EngineError>> + Send>>;

/// Boxed stream of client turns for duplex chat.
pub type RealtimeInputStream = Pin<Box<dyn Stream<Item = RealtimeInput> + Send>>;

/// One client turn in a duplex `realtime_chat` exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealtimeInput {
    /// Turn text.
    pub text: String,
}

/// Errors the engine boundary can produce.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The transport to the engine faulted.
    #[error("Engine transport error: {message}")]
    Transport {
        /// Error description.
        message: String,
    },

    /// The engine reported an API-level failure.
    #[error("Engine error{}: {message}", .code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Api {
        /// Engine-specific error code.
        code: Option<String>,
        /// Error description.
        message: String,
        /// Whether a fresh attempt may succeed.
        retryable: bool,
    },

    /// The stream violated the protocol (e.g. ended without a terminal
    /// event).
    #[error("Engine protocol error: {message}")]
    Protocol {
        /// Error description.
        message: String,
    },

    /// The stream was cancelled.
    #[error("Engine stream cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether a caller-initiated retry may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Api { retryable, .. } => *retryable,
            Self::Protocol { .. } | Self::Cancelled => false,
        }
    }

    /// Error category string for event emission.
    pub fn category(&self) -> &str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Api { .. } => "api",
            Self::Protocol { .. } => "protocol",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Wire payload for one `run_task` call.
///
/// The session config and every history item are serialized independently:
/// the engine deserializes them one by one, and one malformed item cannot
/// poison the whole batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Session the task belongs to.
    pub session_id: SessionId,
    /// Serialized [`SessionConfig`].
    pub config_json: String,
    /// Serialized prior turns, oldest first.
    pub history_json: Vec<String>,
    /// The new input for this turn.
    pub input: String,
}

impl TaskPayload {
    /// Serialize a config and history into a wire payload.
    pub fn build(
        session_id: SessionId,
        config: &SessionConfig,
        history: &[HistoryItem],
        input: impl Into<String>,
    ) -> Result<Self, serde_json::Error> {
        let config_json = serde_json::to_string(config)?;
        let history_json = history
            .iter()
            .map(HistoryItem::to_wire_json)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            session_id,
            config_json,
            history_json,
            input: input.into(),
        })
    }
}

/// The external execution engine, reached via streaming RPC.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Run one task: unary request, server-streamed response.
    async fn run_task(&self, payload: TaskPayload) -> Result<TaskEventStream, EngineError>;

    /// Open a duplex chat: client turns stream in, events stream out.
    async fn realtime_chat(
        &self,
        session_id: SessionId,
        inbound: RealtimeInputStream,
    ) -> Result<TaskEventStream, EngineError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
