//! JSON-RPC 2.0 framing for the MCP boundary.
//!
//! Every business error is still wrapped in the response envelope; the
//! transport never surfaces a bare failure. Every error path echoes the
//! original request `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version string carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

// ── Reserved error codes ────────────────────────────────────────────

/// Malformed JSON payload.
pub const PARSE_ERROR: i64 = -32700;
/// The request object is not a valid JSON-RPC request.
pub const INVALID_REQUEST: i64 = -32600;
/// Method (or tool) does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Parameters are missing or of the wrong shape.
pub const INVALID_PARAMS: i64 = -32602;
/// Handler raised an internal error.
pub const INTERNAL_ERROR: i64 = -32603;
/// Implementation-defined: `call_agent` target absent or not callable.
pub const AGENT_NOT_FOUND: i64 = -32001;

/// Incoming JSON-RPC request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version (`"2.0"`).
    pub jsonrpc: String,
    /// Request identifier, echoed in the response.
    pub id: Value,
    /// Method name (`tools/list`, `tools/call`).
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a request frame.
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Error object inside a failed response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Reserved-range error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// Outgoing JSON-RPC response: exactly one of `result` / `error`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version (`"2.0"`).
    pub jsonrpc: String,
    /// Echoed request identifier.
    pub id: Value,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Build a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Whether this response carries a result.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
