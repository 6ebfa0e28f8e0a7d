// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of spawning processes
//! itself, so tests can swap in an executor that records dispatched tasks and
//! reports completions directly.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::BuildFile;
use crate::engine::RuntimeEvent;
use crate::errors::{PlanError, Result};
use crate::types::TaskName;

use super::ScheduledTask;
use super::executor_loop::{ExecutorCommand, spawn_executor};

/// How scheduled tasks get executed.
pub trait ExecutorBackend: Send {
    /// Start the given tasks.
    ///
    /// Every task must eventually be reported back with a
    /// `RuntimeEvent::NodeCompleted`, unless it is cancelled.
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop every running task. No completion is reported for them.
    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

/// Executor backend that runs each task's `cmd` in a shell.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorCommand>,
}

impl RealExecutorBackend {
    /// Spawns the background executor loop immediately.
    pub fn new(build: &BuildFile, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        let commands: HashMap<TaskName, String> = build
            .task
            .iter()
            .map(|(name, cfg)| (name.clone(), cfg.cmd.clone()))
            .collect();
        let tx = spawn_executor(Arc::new(commands), runtime_tx);
        Self { tx }
    }

    async fn send(tx: mpsc::Sender<ExecutorCommand>, command: ExecutorCommand) -> Result<()> {
        tx.send(command)
            .await
            .map_err(|e| PlanError::Other(anyhow::anyhow!("executor loop has stopped: {e}")))
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for task in tasks {
                Self::send(tx.clone(), ExecutorCommand::Run(task)).await?;
            }
            Ok(())
        })
    }

    fn cancel_all(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();
        Box::pin(async move { Self::send(tx, ExecutorCommand::CancelAll).await })
    }
}
