//! # troupe-mcp
//!
//! The MCP tool-calling protocol layer:
//!
//! - **Protocol**: JSON-RPC 2.0 framing with the reserved error codes
//! - **Registry**: an explicit `Tool` trait + registry (registration is a
//!   list, not runtime introspection)
//! - **Dispatcher**: routes `tools/list` and `tools/call`, including the
//!   synthetic `call_agent` indirection that lets one agent invoke another

#![deny(unsafe_code)]

pub mod dispatcher;
pub mod protocol;
pub mod registry;

pub use dispatcher::{CallMode, ToolDispatcher};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use registry::{Tool, ToolContext, ToolRegistry, ToolSchema};
