//! # troupe-tasks
//!
//! The asynchronous task lifecycle behind agent collaboration:
//!
//! - **Task**: one agent invocation with a monotonic status machine
//!   (SUBMITTED → QUEUED → RUNNING → terminal)
//! - **Queue**: a mutual-exclusion FIFO inbox per agent instance; at most one
//!   task runs per instance, the next queued task promotes automatically on
//!   completion
//! - **Listeners**: one-shot terminal-state callbacks with exactly-once
//!   delivery

#![deny(unsafe_code)]

pub mod listeners;
pub mod queue;
pub mod task;

pub use listeners::TerminalListenerRegistry;
pub use queue::{NewTask, TaskDispatcher, TaskObserver, TaskOutcome, TaskQueue};
pub use task::{FailureKind, Task, TaskFailure, TaskSource, TaskStatus};
