// src/engine/mod.rs

//! Orchestration engine.
//!
//! The finalized plan decides *what* may run; the [`runtime`] is the async
//! shell that drains it: it dispatches ready nodes to an executor backend,
//! feeds completions back into the plan and reacts to shutdown requests.

use crate::plan::NodeId;
use crate::types::{TaskName, TaskOutcome};

/// Runtime options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Maximum number of local tasks executing at once.
    pub max_workers: usize,
}

impl RuntimeOptions {
    /// `None` means one worker per available core.
    pub fn with_max_workers(max_workers: Option<usize>) -> Self {
        let max_workers = max_workers
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
            .max(1);
        Self { max_workers }
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::with_max_workers(None)
    }
}

/// Events flowing into the runtime from executors and signal handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// A dispatched node finished with a concrete outcome.
    NodeCompleted {
        node: NodeId,
        task: TaskName,
        outcome: TaskOutcome,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod runtime;

pub use runtime::Runtime;
