//! Session configuration wire schema.
//!
//! [`SessionConfig`] is the resolved configuration serialized and handed to
//! the execution engine per task. Field names and recognized values follow the
//! engine contract exactly: snake_case keys, optional fields omitted when
//! unset.
//!
//! [`SandboxPolicy`] is a closed tagged variant, not an open hierarchy: the
//! engine and the orchestrator must agree on the full case set.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Model provider family recognized by the execution engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// OpenAI models (`gpt-*`, `o*`).
    Openai,
    /// Anthropic models (`claude-*`).
    Anthropic,
    /// Google models (`gemini-*`).
    Google,
    /// Aliyun models (`qwen-*`).
    Aliyun,
    /// Locally served models via Ollama.
    Ollama,
}

impl ProviderType {
    /// Resolve the provider family from a model name.
    ///
    /// Returns `None` for a model no provider claims; agent definitions with
    /// an unresolvable model are rejected at registration time.
    pub fn for_model(model: &str) -> Option<Self> {
        let lower = model.to_lowercase();
        if lower.starts_with("claude") {
            Some(Self::Anthropic)
        } else if lower.starts_with("gpt") || lower.starts_with("o1") || lower.starts_with("o3") || lower.starts_with("o4") {
            Some(Self::Openai)
        } else if lower.starts_with("gemini") {
            Some(Self::Google)
        } else if lower.starts_with("qwen") {
            Some(Self::Aliyun)
        } else if lower.starts_with("llama") || lower.starts_with("mistral") || lower.starts_with("phi") {
            Some(Self::Ollama)
        } else {
            None
        }
    }

    /// Wire string for this provider (`"anthropic"`, `"openai"`, ...).
    pub fn as_str(&self) -> &str {
        match self {
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Aliyun => "aliyun",
            Self::Ollama => "ollama",
        }
    }
}

/// Provider connection info carried in [`SessionConfig`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider family.
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    /// Bearer token forwarded verbatim to the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental_bearer_token: Option<String>,
    /// Base URL override for self-hosted or proxied endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderInfo {
    /// Provider info with no credentials or endpoint override.
    pub fn bare(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            experimental_bearer_token: None,
            base_url: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policies
// ─────────────────────────────────────────────────────────────────────────────

/// When the engine must pause for user approval before acting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    /// Approve every command from an untrusted agent.
    Untrusted,
    /// Ask only after a command fails.
    OnFailure,
    /// Ask whenever the engine judges a command risky.
    #[default]
    OnRequest,
    /// Never ask.
    Never,
}

/// Declarative execution-permission descriptor attached to a session.
///
/// A closed tagged variant: the engine rejects operations outside the
/// declared policy, so both sides must agree on the complete case set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum SandboxPolicy {
    /// No sandboxing at all.
    DangerFullAccess,
    /// Reads only; every mutation is rejected.
    ReadOnly,
    /// Writes restricted to the listed roots.
    WorkspaceWrite {
        /// Directories the engine may write under.
        writable_roots: Vec<PathBuf>,
        /// Whether outbound network access is permitted.
        network_access: bool,
    },
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::ReadOnly
    }
}

impl SandboxPolicy {
    /// Whether the policy forbids all writes.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly)
    }

    /// Whether outbound network access is permitted.
    pub fn network_access(&self) -> bool {
        match self {
            Self::DangerFullAccess => true,
            Self::ReadOnly => false,
            Self::WorkspaceWrite { network_access, .. } => *network_access,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP servers
// ─────────────────────────────────────────────────────────────────────────────

/// Connection descriptor for one MCP tool server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerConfig {
    /// Spawned subprocess speaking MCP over stdio.
    Stdio {
        /// Executable to launch.
        command: String,
        /// Arguments passed to the command.
        #[serde(default)]
        args: Vec<String>,
        /// Environment variables set for the subprocess.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    /// Remote MCP server reached over HTTP.
    Http {
        /// Server URL.
        url: String,
        /// Headers attached to every request.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Reasoning effort requested from the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// Minimal reasoning.
    Low,
    /// Balanced reasoning.
    Medium,
    /// Deep reasoning.
    High,
}

/// Resolved per-task configuration serialized for the execution engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Provider connection info.
    pub provider: ProviderInfo,
    /// Model ID the engine should run.
    pub model: String,
    /// Reasoning effort override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_reasoning_effort: Option<ReasoningEffort>,
    /// Reasoning summary style (`"auto"`, `"concise"`, `"detailed"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_reasoning_summary: Option<String>,
    /// Instructions authored by the integrating application.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub developer_instructions: Option<String>,
    /// Instructions authored by the end user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_instructions: Option<String>,
    /// Base system prompt for the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_instructions: Option<String>,
    /// Prompt used when the engine compacts history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compact_prompt: Option<String>,
    /// Approval policy for engine-side actions.
    #[serde(default)]
    pub approval_policy: ApprovalPolicy,
    /// Execution-permission policy.
    #[serde(default)]
    pub sandbox_policy: SandboxPolicy,
    /// Working directory for engine-side execution.
    pub cwd: PathBuf,
    /// Where the session originated (client identifier).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_source: Option<String>,
    /// MCP tool servers visible to the agent, keyed by server name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_resolution_by_model_prefix() {
        assert_eq!(ProviderType::for_model("claude-opus-4"), Some(ProviderType::Anthropic));
        assert_eq!(ProviderType::for_model("gpt-4.1"), Some(ProviderType::Openai));
        assert_eq!(ProviderType::for_model("o3-mini"), Some(ProviderType::Openai));
        assert_eq!(ProviderType::for_model("gemini-2.5-pro"), Some(ProviderType::Google));
        assert_eq!(ProviderType::for_model("qwen-max"), Some(ProviderType::Aliyun));
        assert_eq!(ProviderType::for_model("llama3.3"), Some(ProviderType::Ollama));
        assert_eq!(ProviderType::for_model("totally-unknown"), None);
    }

    #[test]
    fn provider_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ProviderType::Anthropic).unwrap(), "\"anthropic\"");
        assert_eq!(serde_json::to_string(&ProviderType::Aliyun).unwrap(), "\"aliyun\"");
    }

    #[test]
    fn provider_info_type_key_on_wire() {
        let info = ProviderInfo::bare(ProviderType::Google);
        let v = serde_json::to_value(&info).unwrap();
        assert_eq!(v["type"], "google");
        assert!(v.get("base_url").is_none());
        assert!(v.get("experimental_bearer_token").is_none());
    }

    #[test]
    fn sandbox_policy_tagged_serialization() {
        let v = serde_json::to_value(&SandboxPolicy::ReadOnly).unwrap();
        assert_eq!(v, json!({"mode": "read-only"}));

        let v = serde_json::to_value(&SandboxPolicy::DangerFullAccess).unwrap();
        assert_eq!(v, json!({"mode": "danger-full-access"}));

        let policy = SandboxPolicy::WorkspaceWrite {
            writable_roots: vec![PathBuf::from("/work")],
            network_access: true,
        };
        let v = serde_json::to_value(&policy).unwrap();
        assert_eq!(v["mode"], "workspace-write");
        assert_eq!(v["writable_roots"][0], "/work");
        assert_eq!(v["network_access"], true);
    }

    #[test]
    fn sandbox_policy_round_trip() {
        let raw = r#"{"mode": "workspace-write", "writable_roots": ["/a", "/b"], "network_access": false}"#;
        let policy: SandboxPolicy = serde_json::from_str(raw).unwrap();
        match policy {
            SandboxPolicy::WorkspaceWrite { writable_roots, network_access } => {
                assert_eq!(writable_roots.len(), 2);
                assert!(!network_access);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn sandbox_policy_helpers() {
        assert!(SandboxPolicy::ReadOnly.is_read_only());
        assert!(!SandboxPolicy::ReadOnly.network_access());
        assert!(SandboxPolicy::DangerFullAccess.network_access());
        let ww = SandboxPolicy::WorkspaceWrite {
            writable_roots: vec![],
            network_access: true,
        };
        assert!(!ww.is_read_only());
        assert!(ww.network_access());
    }

    #[test]
    fn mcp_server_config_untagged_variants() {
        let raw = r#"{"command": "node", "args": ["server.js"], "env": {"PORT": "9000"}}"#;
        let cfg: McpServerConfig = serde_json::from_str(raw).unwrap();
        match cfg {
            McpServerConfig::Stdio { command, args, env } => {
                assert_eq!(command, "node");
                assert_eq!(args, vec!["server.js"]);
                assert_eq!(env.get("PORT").map(String::as_str), Some("9000"));
            }
            McpServerConfig::Http { .. } => panic!("expected stdio variant"),
        }

        let raw = r#"{"url": "https://tools.example.com/mcp", "headers": {"authorization": "Bearer x"}}"#;
        let cfg: McpServerConfig = serde_json::from_str(raw).unwrap();
        assert!(matches!(cfg, McpServerConfig::Http { .. }));
    }

    #[test]
    fn approval_policy_kebab_case() {
        assert_eq!(serde_json::to_string(&ApprovalPolicy::OnRequest).unwrap(), "\"on-request\"");
        assert_eq!(serde_json::to_string(&ApprovalPolicy::OnFailure).unwrap(), "\"on-failure\"");
    }

    #[test]
    fn session_config_wire_format() {
        let config = SessionConfig {
            provider: ProviderInfo {
                provider_type: ProviderType::Anthropic,
                experimental_bearer_token: Some("tok".into()),
                base_url: None,
            },
            model: "claude-sonnet-4".into(),
            model_reasoning_effort: Some(ReasoningEffort::High),
            model_reasoning_summary: None,
            developer_instructions: Some("be terse".into()),
            user_instructions: None,
            base_instructions: Some("you are a translator".into()),
            compact_prompt: None,
            approval_policy: ApprovalPolicy::Never,
            sandbox_policy: SandboxPolicy::ReadOnly,
            cwd: PathBuf::from("/workspace"),
            session_source: Some("troupe".into()),
            mcp_servers: BTreeMap::new(),
        };

        let v = serde_json::to_value(&config).unwrap();
        assert_eq!(v["provider"]["type"], "anthropic");
        assert_eq!(v["model"], "claude-sonnet-4");
        assert_eq!(v["model_reasoning_effort"], "high");
        assert_eq!(v["approval_policy"], "never");
        assert_eq!(v["sandbox_policy"]["mode"], "read-only");
        assert_eq!(v["cwd"], "/workspace");
        // None fields and the empty server map stay off the wire
        assert!(v.get("user_instructions").is_none());
        assert!(v.get("compact_prompt").is_none());
        assert!(v.get("mcp_servers").is_none());
    }

    #[test]
    fn session_config_round_trip_with_servers() {
        let mut servers = BTreeMap::new();
        let _ = servers.insert(
            "local-tools".to_owned(),
            McpServerConfig::Stdio {
                command: "mcp-tools".into(),
                args: vec!["--stdio".into()],
                env: BTreeMap::new(),
            },
        );
        let config = SessionConfig {
            provider: ProviderInfo::bare(ProviderType::Ollama),
            model: "llama3.3".into(),
            model_reasoning_effort: None,
            model_reasoning_summary: None,
            developer_instructions: None,
            user_instructions: None,
            base_instructions: None,
            compact_prompt: None,
            approval_policy: ApprovalPolicy::default(),
            sandbox_policy: SandboxPolicy::default(),
            cwd: PathBuf::from("/tmp"),
            session_source: None,
            mcp_servers: servers,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
