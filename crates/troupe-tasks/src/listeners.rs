//! One-shot terminal-state listeners.
//!
//! At most one listener per task; delivery is exactly-once, implemented as
//! remove-then-invoke so a double notification cannot happen even under
//! concurrent terminal transitions. Fire-and-forget tasks simply never
//! register a listener; their terminal transition is recorded by the queue
//! and nothing fires.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tracing::debug;

use troupe_core::errors::OrchestratorError;
use troupe_core::ids::TaskId;

use crate::task::Task;

/// Callback invoked exactly once with the final task snapshot.
pub type TerminalListener = Box<dyn FnOnce(Task) + Send + Sync>;

/// Registry mapping task IDs to their single terminal listener.
#[derive(Default)]
pub struct TerminalListenerRegistry {
    listeners: DashMap<TaskId, TerminalListener>,
}

impl TerminalListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
        }
    }

    /// Register the listener for a task.
    ///
    /// A second registration for the same task fails with
    /// [`OrchestratorError::DuplicateListener`]; at-most-once delivery is a
    /// design invariant, mirroring a single-shot future.
    pub fn add(&self, task_id: TaskId, listener: TerminalListener) -> Result<(), OrchestratorError> {
        match self.listeners.entry(task_id.clone()) {
            Entry::Occupied(_) => {
                Err(OrchestratorError::DuplicateListener(task_id.into_inner()))
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(listener);
                Ok(())
            }
        }
    }

    /// Deliver a terminal snapshot to the task's listener, if any.
    ///
    /// Returns whether a listener fired. The listener is removed before
    /// invocation, so repeated calls are idempotent.
    pub fn notify(&self, task: &Task) -> bool {
        if let Some((_, listener)) = self.listeners.remove(&task.id) {
            debug!(task_id = %task.id, status = task.status.as_str(), "terminal listener fired");
            listener(task.clone());
            true
        } else {
            false
        }
    }

    /// Drop a pending listener without firing it.
    pub fn remove(&self, task_id: &TaskId) -> bool {
        self.listeners.remove(task_id).is_some()
    }

    /// Whether a listener is still pending for the task.
    pub fn has(&self, task_id: &TaskId) -> bool {
        self.listeners.contains_key(task_id)
    }

    /// Number of pending listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listeners are pending.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Register a listener that resolves a oneshot future with the final
    /// snapshot. The synchronous `call_agent` path awaits this.
    pub fn wait(&self, task_id: TaskId) -> Result<oneshot::Receiver<Task>, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.add(
            task_id,
            Box::new(move |task| {
                // The waiter may have given up; a dropped receiver is fine.
                let _ = tx.send(task);
            }),
        )?;
        Ok(rx)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
