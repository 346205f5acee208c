//! Conversation history records.
//!
//! Each agent instance accumulates an ordered list of [`HistoryItem`]s; the
//! bridge serializes every item independently when building the engine
//! payload, so a malformed item can be rejected without losing the rest of
//! the turn sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of one prior turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    /// The end user (or a calling agent relaying on their behalf).
    User,
    /// The agent's own response.
    Assistant,
    /// A tool result fed back into the conversation.
    Tool,
}

/// One prior turn in an agent instance's conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Turn author.
    pub role: HistoryRole,
    /// Turn content.
    pub content: String,
    /// When the turn was recorded.
    pub timestamp: DateTime<Utc>,
}

impl HistoryItem {
    /// A user turn stamped now.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// An assistant turn stamped now.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// A tool-result turn stamped now.
    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::Tool,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Serialize this item for the engine wire payload.
    pub fn to_wire_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
