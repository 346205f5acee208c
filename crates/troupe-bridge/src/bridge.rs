//! Execution bridge.
//!
//! One bridge run per RUNNING task: build the wire payload, open the engine
//! stream, republish each chunk to the task's subscribers, and settle the
//! task through the queue's completion path.
//!
//! **Cancellation** is cooperative: the queue's [`CancellationToken`] is
//! observed at every chunk boundary, and the task only transitions to
//! CANCELLED after the stream is torn down here, so no upstream call is
//! orphaned. **Timeouts** ride the same path but settle as FAILED with a
//! distinguishable timeout error.
//!
//! A `tool_call` event naming a dispatcher-routable tool re-enters the
//! [`ToolRouter`] recursively; this is how one agent calls another without
//! its own turn ending.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{OnceCell, broadcast};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use troupe_core::config::SessionConfig;
use troupe_core::events::TaskEvent;
use troupe_core::history::HistoryItem;
use troupe_core::ids::{InstanceId, SessionId, TaskId};
use troupe_tasks::queue::{TaskOutcome, TaskQueue};
use troupe_tasks::task::{Task, TaskFailure};

use crate::engine::{EngineError, ExecutionEngine, RealtimeInputStream, TaskEventStream, TaskPayload};

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

/// Re-entry point into the tool dispatcher.
///
/// A trait seam (rather than a direct dependency) because the dispatcher in
/// turn submits tasks whose execution lands back here.
#[async_trait]
pub trait ToolRouter: Send + Sync {
    /// Whether this tool name is routable by the dispatcher.
    fn routes(&self, name: &str) -> bool;

    /// Route one tool call on behalf of `caller` and return the result
    /// payload. Failures come back as error-shaped payloads, never as a
    /// transport fault.
    async fn route(
        &self,
        session_id: &SessionId,
        caller: &InstanceId,
        tool_call_id: &str,
        name: &str,
        arguments: Value,
    ) -> Value;
}

/// Bridge tuning knobs.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Per-task deadline. Long tasks (tens of minutes) are expected.
    pub task_timeout: std::time::Duration,
    /// Capacity of each task's event broadcast channel.
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            task_timeout: std::time::Duration::from_secs(30 * 60),
            event_capacity: 256,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────────────────────────────────────

/// Translates tasks into streaming engine calls and back.
pub struct ExecutionBridge {
    engine: Arc<dyn ExecutionEngine>,
    queue: Arc<TaskQueue>,
    config: BridgeConfig,
    channels: DashMap<TaskId, broadcast::Sender<TaskEvent>>,
    router: OnceCell<Arc<dyn ToolRouter>>,
}

impl ExecutionBridge {
    /// Create a bridge over the given engine and queue.
    pub fn new(engine: Arc<dyn ExecutionEngine>, queue: Arc<TaskQueue>, config: BridgeConfig) -> Self {
        Self {
            engine,
            queue,
            config,
            channels: DashMap::new(),
            router: OnceCell::new(),
        }
    }

    /// Inject the tool router (breaks the bridge ↔ dispatcher cycle).
    pub fn set_tool_router(&self, router: Arc<dyn ToolRouter>) {
        let _ = self.router.set(router);
    }

    /// Subscribe to a task's event stream.
    ///
    /// Events published before the first subscription are not replayed.
    pub fn subscribe(&self, task_id: &TaskId) -> broadcast::Receiver<TaskEvent> {
        self.channels
            .entry(task_id.clone())
            .or_insert_with(|| broadcast::channel(self.config.event_capacity).0)
            .subscribe()
    }

    /// Drive a task on a fresh tokio task.
    pub fn spawn_run(self: &Arc<Self>, task: Task, config: SessionConfig, history: Vec<HistoryItem>) {
        let bridge = self.clone();
        let span = info_span!("bridge_run", task_id = %task.id, target = %task.target);
        let _ = tokio::spawn(async move { bridge.run(task, config, history).await }.instrument(span));
    }

    /// Execute one task against the engine and settle it.
    pub async fn run(&self, task: Task, config: SessionConfig, history: Vec<HistoryItem>) {
        let cancel = self
            .queue
            .cancellation(&task.id)
            .unwrap_or_else(CancellationToken::new);
        let deadline = Instant::now() + self.config.task_timeout;
        let timeout_ms = self.config.task_timeout.as_millis() as u64;

        let payload = match TaskPayload::build(task.session_id.clone(), &config, &history, task.input.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                self.settle(
                    &task.id,
                    TaskOutcome::Failed(TaskFailure::upstream(format!(
                        "payload serialization failed: {err}"
                    ))),
                );
                return;
            }
        };

        let mut stream = match self.engine.run_task(payload).await {
            Ok(stream) => stream,
            Err(err) => {
                self.settle(&task.id, TaskOutcome::Failed(TaskFailure::upstream(err.to_string())));
                return;
            }
        };

        let mut aggregated = String::new();
        let outcome = loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(task_id = %task.id, "cancellation observed at chunk boundary");
                    break TaskOutcome::Cancelled;
                }
                () = sleep_until(deadline) => {
                    warn!(task_id = %task.id, timeout_ms, "task deadline expired");
                    break TaskOutcome::Failed(TaskFailure::timeout(timeout_ms));
                }
                chunk = stream.next() => match chunk {
                    None => {
                        break TaskOutcome::Failed(TaskFailure::upstream(
                            "engine stream ended without a terminal event",
                        ));
                    }
                    Some(Err(err)) => {
                        break TaskOutcome::Failed(TaskFailure::upstream(err.to_string()));
                    }
                    Some(Ok(event)) => {
                        self.publish(&task.id, event.clone());
                        match event {
                            TaskEvent::Text { text } => aggregated.push_str(&text),
                            TaskEvent::ToolCall { tool_call_id, name, arguments } => {
                                self.route_tool_call(&task, &tool_call_id, &name, arguments).await;
                            }
                            TaskEvent::Error { message } => {
                                break TaskOutcome::Failed(TaskFailure::upstream(message));
                            }
                            TaskEvent::Done { result } => {
                                let result = if result.is_empty() {
                                    aggregated.clone()
                                } else {
                                    result
                                };
                                break TaskOutcome::Completed { result };
                            }
                            TaskEvent::Thinking { .. } | TaskEvent::ToolResult { .. } => {}
                        }
                    }
                }
            }
        };

        // Tear the stream down before the terminal transition: a cancel is
        // only final once the upstream call is gone.
        drop(stream);
        self.settle(&task.id, outcome);
    }

    /// Open a duplex realtime exchange with the engine.
    pub async fn open_realtime(
        &self,
        session_id: SessionId,
        inbound: RealtimeInputStream,
    ) -> Result<TaskEventStream, EngineError> {
        self.engine.realtime_chat(session_id, inbound).await
    }

    // ── Internal ────────────────────────────────────────────────────────

    /// Re-enter the dispatcher for a routable streamed tool call.
    ///
    /// The executing agent is the caller of its own nested tool calls.
    async fn route_tool_call(&self, task: &Task, tool_call_id: &str, name: &str, arguments: Value) {
        let Some(router) = self.router.get() else {
            return;
        };
        if !router.routes(name) {
            return;
        }
        debug!(task_id = %task.id, tool = name, "re-entering dispatcher for streamed tool call");
        let result = router
            .route(&task.session_id, &task.target, tool_call_id, name, arguments)
            .await;
        self.publish(
            &task.id,
            TaskEvent::ToolResult {
                tool_call_id: tool_call_id.to_owned(),
                result,
            },
        );
    }

    fn publish(&self, task_id: &TaskId, event: TaskEvent) {
        if let Some(tx) = self.channels.get(task_id) {
            // Send only fails with zero receivers; that is fire-and-forget.
            let _ = tx.send(event);
        }
    }

    fn settle(&self, task_id: &TaskId, outcome: TaskOutcome) {
        if let Err(err) = self.queue.finish(task_id, outcome) {
            // An IllegalTransition here is an internal invariant violation;
            // log it and carry on rather than crash the orchestrator.
            warn!(task_id = %task_id, error = %err, "failed to settle task");
        }
        let _ = self.channels.remove(task_id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
