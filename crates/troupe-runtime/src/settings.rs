//! Orchestrator settings.
//!
//! Loading flow:
//! 1. Start with compiled [`OrchestratorSettings::default()`]
//! 2. If a settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules: objects merge recursively, arrays and primitives are
//! replaced, nulls in the source are skipped.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors from loading or parsing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tunable knobs for the orchestration core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Per-task deadline in milliseconds. Long tasks are expected, so the
    /// default is generous.
    pub task_timeout_ms: u64,
    /// How long a synchronous `call_agent` / `send_message` waits before
    /// cancelling, in milliseconds.
    pub sync_call_timeout_ms: u64,
    /// Retention window for settled tasks, in seconds.
    pub task_retention_secs: u64,
    /// Interval between eviction sweeps, in seconds.
    pub eviction_interval_secs: u64,
    /// Capacity of each task's event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            task_timeout_ms: 30 * 60 * 1000,
            sync_call_timeout_ms: 120_000,
            task_retention_secs: 300,
            eviction_interval_secs: 60,
            event_channel_capacity: 256,
        }
    }
}

impl OrchestratorSettings {
    /// Per-task deadline as a [`Duration`].
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Synchronous call deadline as a [`Duration`].
    pub fn sync_call_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_call_timeout_ms)
    }

    /// Task retention window as a [`Duration`].
    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }

    /// Eviction sweep interval as a [`Duration`].
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

/// Load settings from a file with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<OrchestratorSettings, SettingsError> {
    let defaults = serde_json::to_value(OrchestratorSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: OrchestratorSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides.
///
/// Integers must parse and fall in range; invalid values are silently
/// ignored (falling back to file/default).
pub fn apply_env_overrides(settings: &mut OrchestratorSettings) {
    if let Some(v) = read_env_u64("TROUPE_TASK_TIMEOUT_MS", 1_000, 24 * 60 * 60 * 1000) {
        settings.task_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("TROUPE_SYNC_CALL_TIMEOUT_MS", 100, 60 * 60 * 1000) {
        settings.sync_call_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("TROUPE_TASK_RETENTION_SECS", 0, 7 * 24 * 3600) {
        settings.task_retention_secs = v;
    }
    if let Some(v) = read_env_u64("TROUPE_EVICTION_INTERVAL_SECS", 1, 3600) {
        settings.eviction_interval_secs = v;
    }
    if let Some(v) = read_env_u64("TROUPE_EVENT_CHANNEL_CAPACITY", 8, 65_536) {
        settings.event_channel_capacity = v as usize;
    }
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|raw| parse_override(&raw, min, max))
}

/// Parse one override value with strict range checking.
fn parse_override(raw: &str, min: u64, max: u64) -> Option<u64> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
