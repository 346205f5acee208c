//! # troupe-bridge
//!
//! Bridges one task to the external execution engine:
//!
//! - **Engine**: the `ExecutionEngine` trait — unary-request /
//!   streamed-response `run_task` plus duplex `realtime_chat`
//! - **Bridge**: consumes the engine stream, republishes each chunk to task
//!   subscribers, re-enters the tool dispatcher for routable `tool_call`
//!   events, and settles the task through the queue's completion path with
//!   cooperative cancellation and per-task deadlines

#![deny(unsafe_code)]

pub mod bridge;
pub mod engine;

pub use bridge::{BridgeConfig, ExecutionBridge, ToolRouter};
pub use engine::{EngineError, ExecutionEngine, RealtimeInput, RealtimeInputStream, TaskEventStream, TaskPayload};
