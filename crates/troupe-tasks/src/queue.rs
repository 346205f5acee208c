//! Per-agent task queue with promotion-on-completion.
//!
//! Each agent instance owns one mutual-exclusion inbox. Submitting to an IDLE
//! agent dispatches immediately (SUBMITTED → RUNNING); submitting to a BUSY
//! agent queues FIFO (SUBMITTED → QUEUED, earliest submission first, ties
//! broken by the monotonic sequence counter). When the running task settles,
//! the inbox atomically pops the next queued task and promotes it. The
//! check-and-transition happens under the inbox mutex, so two threads can
//! never promote two tasks for one agent.
//!
//! Cancellation is cooperative: a queued task cancels in place; a running
//! task only gets its [`CancellationToken`] signalled and stays RUNNING until
//! the bridge confirms teardown through [`TaskQueue::finish`].
//!
//! Lock discipline: inbox mutex first, then short-lived map shard access.
//! Map guards are never held across an inbox lock acquisition.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use troupe_core::agents::AgentState;
use troupe_core::errors::OrchestratorError;
use troupe_core::ids::{InstanceId, SessionId, TaskId};

use crate::listeners::TerminalListenerRegistry;
use crate::task::{FailureKind, Task, TaskFailure, TaskSource, TaskStatus};

// ─────────────────────────────────────────────────────────────────────────────
// Wiring traits
// ─────────────────────────────────────────────────────────────────────────────

/// Receives tasks the queue has promoted to RUNNING.
///
/// The runtime implements this by handing the task to the execution bridge;
/// injected late through a `OnceCell` because the bridge also calls back into
/// the queue.
pub trait TaskDispatcher: Send + Sync {
    /// Start executing a task that just became RUNNING.
    fn dispatch(&self, task: Task);
}

/// Observes every terminal transition, before the one-shot listener fires.
///
/// Used by the runtime to record results into conversation history; terminal
/// transitions are recorded here even when no listener was registered.
pub trait TaskObserver: Send + Sync {
    /// A task just reached a terminal state.
    fn on_terminal(&self, task: &Task);
}

/// How a running task settled.
#[derive(Clone, Debug)]
pub enum TaskOutcome {
    /// The engine stream finished with a result.
    Completed {
        /// Aggregated final text.
        result: String,
    },
    /// The engine stream failed or the deadline expired.
    Failed(TaskFailure),
    /// The bridge tore down after a cancel request.
    Cancelled,
}

/// Parameters for submitting a task.
///
/// The caller supplies the ID so it can register a terminal listener before
/// submission; the fast path may complete before `submit` even returns.
#[derive(Clone, Debug)]
pub struct NewTask {
    /// Pre-allocated task ID.
    pub id: TaskId,
    /// Owning session.
    pub session_id: SessionId,
    /// Requesting party.
    pub source: TaskSource,
    /// Target agent instance.
    pub target: InstanceId,
    /// Message for the target agent.
    pub input: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

/// One agent instance's inbox.
struct Inbox {
    state: AgentState,
    running: Option<TaskId>,
    waiting: VecDeque<TaskId>,
}

impl Inbox {
    fn new() -> Self {
        Self {
            state: AgentState::Idle,
            running: None,
            waiting: VecDeque::new(),
        }
    }
}

/// Concurrency-limited task scheduler: one inbox per agent instance.
pub struct TaskQueue {
    inboxes: DashMap<InstanceId, Arc<Mutex<Inbox>>>,
    tasks: DashMap<TaskId, Task>,
    cancellations: DashMap<TaskId, CancellationToken>,
    listeners: Arc<TerminalListenerRegistry>,
    seq: AtomicU64,
    dispatcher: OnceCell<Arc<dyn TaskDispatcher>>,
    observer: OnceCell<Arc<dyn TaskObserver>>,
}

impl TaskQueue {
    /// Create a queue that delivers terminal snapshots through `listeners`.
    pub fn new(listeners: Arc<TerminalListenerRegistry>) -> Self {
        Self {
            inboxes: DashMap::new(),
            tasks: DashMap::new(),
            cancellations: DashMap::new(),
            listeners,
            seq: AtomicU64::new(0),
            dispatcher: OnceCell::new(),
            observer: OnceCell::new(),
        }
    }

    /// Inject the dispatcher (breaks the queue ↔ bridge cycle).
    pub fn set_dispatcher(&self, dispatcher: Arc<dyn TaskDispatcher>) {
        let _ = self.dispatcher.set(dispatcher);
    }

    /// Inject the terminal observer.
    pub fn set_observer(&self, observer: Arc<dyn TaskObserver>) {
        let _ = self.observer.set(observer);
    }

    /// The listener registry terminal snapshots are delivered through.
    pub fn listeners(&self) -> &Arc<TerminalListenerRegistry> {
        &self.listeners
    }

    // ── Agent registration ──────────────────────────────────────────────

    /// Create the inbox for a freshly instantiated agent.
    pub fn register_agent(&self, agent_id: InstanceId) {
        let _ = self.inboxes
            .entry(agent_id)
            .or_insert_with(|| Arc::new(Mutex::new(Inbox::new())));
    }

    /// Remove an agent's inbox.
    ///
    /// Fails with a state error while a task is RUNNING; the caller must
    /// drain (cancel or await) first.
    pub fn unregister_agent(&self, agent_id: &InstanceId) -> Result<(), OrchestratorError> {
        let inbox = self
            .inboxes
            .get(agent_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrchestratorError::NotFound(format!("agent inbox {agent_id}")))?;

        {
            let guard = inbox.lock();
            if guard.running.is_some() {
                return Err(OrchestratorError::State(format!(
                    "agent {agent_id} has a running task; drain before removal"
                )));
            }
        }
        let _ = self.inboxes.remove(agent_id);
        Ok(())
    }

    // ── Submission ──────────────────────────────────────────────────────

    /// Submit a task to its target agent's inbox.
    ///
    /// IDLE target ⇒ SUBMITTED → RUNNING and immediate dispatch; BUSY target
    /// ⇒ SUBMITTED → QUEUED, appended FIFO. Returns the post-routing
    /// snapshot.
    pub fn submit(&self, new: NewTask) -> Result<Task, OrchestratorError> {
        let inbox = self
            .inboxes
            .get(&new.target)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrchestratorError::NotFound(format!("agent inbox {}", new.target)))?;

        let now = chrono::Utc::now();
        let mut task = Task {
            id: new.id,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            session_id: new.session_id,
            source: new.source,
            target: new.target,
            input: new.input,
            status: TaskStatus::Submitted,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };

        let snapshot = {
            let mut guard = inbox.lock();
            if guard.state == AgentState::Idle {
                task.transition(TaskStatus::Running)?;
                guard.state = AgentState::Busy;
                guard.running = Some(task.id.clone());
                let _ = self.cancellations
                    .insert(task.id.clone(), CancellationToken::new());
            } else {
                task.transition(TaskStatus::Queued)?;
                guard.waiting.push_back(task.id.clone());
            }
            let _ = self.tasks.insert(task.id.clone(), task.clone());
            task
        };

        debug!(
            task_id = %snapshot.id,
            target = %snapshot.target,
            status = snapshot.status.as_str(),
            "task submitted"
        );

        if snapshot.status == TaskStatus::Running {
            self.dispatch(snapshot.clone());
        }
        Ok(snapshot)
    }

    // ── Completion path ─────────────────────────────────────────────────

    /// Settle the running task for its agent and promote the next one.
    ///
    /// Called by the bridge once the engine stream has torn down (this is the
    /// acknowledgement that makes a cancel final). Applies the terminal
    /// transition, records the result or error, fires the observer and the
    /// one-shot listener, then atomically promotes the earliest QUEUED task
    /// to RUNNING and dispatches it.
    pub fn finish(
        &self,
        task_id: &TaskId,
        outcome: TaskOutcome,
    ) -> Result<Option<Task>, OrchestratorError> {
        let target = self.target_of(task_id)?;
        let inbox = self
            .inboxes
            .get(&target)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrchestratorError::NotFound(format!("agent inbox {target}")))?;

        let (terminal, promoted) = {
            let mut guard = inbox.lock();

            let terminal = {
                let mut entry = self
                    .tasks
                    .get_mut(task_id)
                    .ok_or_else(|| OrchestratorError::NotFound(format!("task {task_id}")))?;
                let task = entry.value_mut();
                match outcome {
                    TaskOutcome::Completed { result } => {
                        task.transition(TaskStatus::Completed)?;
                        task.result = Some(result);
                    }
                    TaskOutcome::Failed(failure) => {
                        task.transition(TaskStatus::Failed)?;
                        task.error = Some(failure);
                    }
                    TaskOutcome::Cancelled => {
                        task.transition(TaskStatus::Cancelled)?;
                        task.error = Some(TaskFailure {
                            kind: FailureKind::Cancelled,
                            message: "cancelled before completion".into(),
                        });
                    }
                }
                task.clone()
            };

            let promoted = if guard.running.as_ref() == Some(task_id) {
                guard.running = None;
                self.promote_next(&mut guard)
            } else {
                None
            };

            (terminal, promoted)
        };

        let _ = self.cancellations.remove(task_id);

        debug!(
            task_id = %terminal.id,
            status = terminal.status.as_str(),
            promoted = promoted.as_ref().map(|t| t.id.to_string()),
            "task settled"
        );

        if let Some(observer) = self.observer.get() {
            observer.on_terminal(&terminal);
        }
        let _ = self.listeners.notify(&terminal);

        if let Some(next) = promoted.clone() {
            self.dispatch(next);
        }
        Ok(promoted)
    }

    /// Promote the earliest queued task. Must hold the inbox lock.
    fn promote_next(&self, inbox: &mut Inbox) -> Option<Task> {
        while let Some(next_id) = inbox.waiting.pop_front() {
            let Some(mut entry) = self.tasks.get_mut(&next_id) else {
                warn!(task_id = %next_id, "queued task vanished before promotion");
                continue;
            };
            let task = entry.value_mut();
            if let Err(err) = task.transition(TaskStatus::Running) {
                warn!(task_id = %next_id, error = %err, "skipping unpromotable task");
                continue;
            }
            inbox.state = AgentState::Busy;
            inbox.running = Some(next_id.clone());
            let _ = self.cancellations
                .insert(next_id, CancellationToken::new());
            return Some(task.clone());
        }
        inbox.state = AgentState::Idle;
        None
    }

    // ── Cancellation ────────────────────────────────────────────────────

    /// Cancel a task.
    ///
    /// QUEUED ⇒ removed from the inbox and CANCELLED immediately. RUNNING ⇒
    /// the bridge's cancellation token is signalled; the task stays RUNNING
    /// until the bridge confirms teardown via [`finish`](Self::finish).
    /// Terminal ⇒ `IllegalTransition`.
    pub fn cancel(&self, task_id: &TaskId) -> Result<Task, OrchestratorError> {
        let target = self.target_of(task_id)?;
        let inbox = self
            .inboxes
            .get(&target)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrchestratorError::NotFound(format!("agent inbox {target}")))?;

        let (snapshot, settled) = {
            let mut guard = inbox.lock();
            let mut entry = self
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| OrchestratorError::NotFound(format!("task {task_id}")))?;
            let task = entry.value_mut();

            match task.status {
                TaskStatus::Submitted | TaskStatus::Queued => {
                    guard.waiting.retain(|id| id != task_id);
                    task.transition(TaskStatus::Cancelled)?;
                    task.error = Some(TaskFailure {
                        kind: FailureKind::Cancelled,
                        message: "cancelled while queued".into(),
                    });
                    (task.clone(), true)
                }
                TaskStatus::Running => {
                    if let Some(token) = self.cancellations.get(task_id) {
                        token.cancel();
                    }
                    (task.clone(), false)
                }
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                    return Err(OrchestratorError::IllegalTransition {
                        from: task.status.as_str().to_owned(),
                        to: TaskStatus::Cancelled.as_str().to_owned(),
                    });
                }
            }
        };

        if settled {
            debug!(task_id = %snapshot.id, "queued task cancelled");
            if let Some(observer) = self.observer.get() {
                observer.on_terminal(&snapshot);
            }
            let _ = self.listeners.notify(&snapshot);
        } else {
            debug!(task_id = %snapshot.id, "cancellation signalled to bridge");
        }
        Ok(snapshot)
    }

    /// Cancel every non-terminal task belonging to a session.
    ///
    /// Used by interrupt and close. Nothing is lost silently: queued tasks
    /// settle as CANCELLED and running tasks settle once their bridge tears
    /// down.
    pub fn cancel_all_for_session(&self, session_id: &SessionId) -> usize {
        let pending: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|entry| entry.session_id == *session_id && !entry.status.is_terminal())
            .map(|entry| entry.id.clone())
            .collect();

        let mut cancelled = 0;
        for task_id in pending {
            match self.cancel(&task_id) {
                Ok(_) => cancelled += 1,
                // A task may settle between the scan and the cancel.
                Err(OrchestratorError::IllegalTransition { .. }) => {}
                Err(err) => warn!(task_id = %task_id, error = %err, "cascade cancel failed"),
            }
        }
        cancelled
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// Snapshot of a task.
    pub fn get(&self, task_id: &TaskId) -> Option<Task> {
        self.tasks.get(task_id).map(|entry| entry.clone())
    }

    /// Busy/idle state of an agent's inbox.
    pub fn agent_state(&self, agent_id: &InstanceId) -> Option<AgentState> {
        self.inboxes
            .get(agent_id)
            .map(|entry| entry.value().lock().state)
    }

    /// ID of the agent's currently running task, if any.
    pub fn running_task(&self, agent_id: &InstanceId) -> Option<TaskId> {
        self.inboxes
            .get(agent_id)
            .and_then(|entry| entry.value().lock().running.clone())
    }

    /// Number of tasks waiting in an agent's inbox.
    pub fn queued_count(&self, agent_id: &InstanceId) -> usize {
        self.inboxes
            .get(agent_id)
            .map_or(0, |entry| entry.value().lock().waiting.len())
    }

    /// Number of RUNNING tasks recorded for an agent (0 or 1 by invariant).
    pub fn running_count(&self, agent_id: &InstanceId) -> usize {
        self.tasks
            .iter()
            .filter(|entry| entry.target == *agent_id && entry.status == TaskStatus::Running)
            .count()
    }

    /// Cancellation token the bridge must observe for a running task.
    pub fn cancellation(&self, task_id: &TaskId) -> Option<CancellationToken> {
        self.cancellations.get(task_id).map(|entry| entry.clone())
    }

    // ── Eviction ────────────────────────────────────────────────────────

    /// Evict terminal tasks whose retention window has elapsed.
    ///
    /// A task is only evicted after its listener (if any) was delivered, so a
    /// slow waiter never loses the final snapshot. Returns the eviction
    /// count.
    pub fn evict_expired(&self, retention: Duration) -> usize {
        let now = chrono::Utc::now();
        let before = self.tasks.len();
        self.tasks.retain(|id, task| {
            if !task.status.is_terminal() || self.listeners.has(id) {
                return true;
            }
            let age = (now - task.updated_at).to_std().unwrap_or_default();
            age < retention
        });
        before - self.tasks.len()
    }

    // ── Internal ────────────────────────────────────────────────────────

    fn target_of(&self, task_id: &TaskId) -> Result<InstanceId, OrchestratorError> {
        self.tasks
            .get(task_id)
            .map(|entry| entry.target.clone())
            .ok_or_else(|| OrchestratorError::NotFound(format!("task {task_id}")))
    }

    fn dispatch(&self, task: Task) {
        if let Some(dispatcher) = self.dispatcher.get() {
            dispatcher.dispatch(task);
        } else {
            warn!(task_id = %task.id, "no dispatcher wired; task stays RUNNING");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
