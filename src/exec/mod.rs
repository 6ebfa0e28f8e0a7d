// src/exec/mod.rs

//! Process execution layer.
//!
//! Runs the commands of local tasks with `tokio::process::Command` and
//! reports every exit back to the runtime as a `RuntimeEvent`.
//!
//! - [`executor_loop`] owns the background loop tracking running processes.
//! - [`task_runner`] runs a single task process.
//! - [`backend`] provides the `ExecutorBackend` trait the runtime talks to,
//!   and `RealExecutorBackend`, which tests replace with a fake.

pub mod backend;
pub mod executor_loop;
pub mod task_runner;

use crate::plan::NodeId;
use crate::types::TaskName;

/// A local task handed to an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub node: NodeId,
    pub name: TaskName,
}

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use executor_loop::{ExecutorCommand, spawn_executor};
