// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{PlanError, Result};
use crate::exec::{ExecutorBackend, ScheduledTask};
use crate::plan::{ExecutionSummary, FinalizedPlan, NodeKind, Selection};
use crate::types::TaskOutcome;

use super::{RuntimeEvent, RuntimeOptions};

/// Drains a [`FinalizedPlan`], delegating command execution to an
/// [`ExecutorBackend`].
pub struct Runtime<E: ExecutorBackend> {
    plan: FinalizedPlan,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    options: RuntimeOptions,
    in_flight: usize,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("plan", &self.plan.display_name())
            .field("options", &self.options)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        plan: FinalizedPlan,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            plan,
            event_rx,
            executor,
            options,
            in_flight: 0,
        }
    }

    /// Main loop.
    ///
    /// - Dispatches every ready node, up to `max_workers` at once.
    /// - Waits for a `RuntimeEvent` and feeds completions into the plan.
    /// - Returns once every node reached a terminal state, or on shutdown.
    pub async fn run(mut self) -> Result<ExecutionSummary> {
        info!(
            plan = %self.plan.display_name(),
            nodes = self.plan.size(),
            max_workers = self.options.max_workers,
            "runtime started"
        );

        loop {
            let finished = self.dispatch_ready().await?;
            if finished && self.in_flight == 0 {
                info!("all nodes reached a terminal state");
                break;
            }
            if self.in_flight == 0 {
                return Err(PlanError::Other(anyhow::anyhow!(
                    "no node is running and none can start; the plan cannot make progress"
                )));
            }

            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    warn!("runtime event channel closed; exiting");
                    self.plan.close();
                    break;
                }
            };
            debug!(?event, "runtime received event");

            match event {
                RuntimeEvent::NodeCompleted {
                    node,
                    task,
                    outcome,
                } => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    match outcome {
                        TaskOutcome::Success => info!(task = %task, "task succeeded"),
                        TaskOutcome::Failed(code) => warn!(task = %task, exit_code = code, "task failed"),
                    }
                    self.plan.finish_node(node, outcome)?;
                }
                RuntimeEvent::ShutdownRequested => {
                    info!(running = self.in_flight, "shutdown requested; cancelling running tasks");
                    self.plan.close();
                    self.executor.cancel_all().await?;
                    break;
                }
            }
        }

        let summary = self.plan.summary();
        info!(
            succeeded = summary.succeeded().len(),
            failed = summary.failed().len(),
            skipped = summary.skipped().len(),
            "runtime exiting"
        );
        Ok(summary)
    }

    /// Start everything the plan offers. Returns `true` once the plan is finished.
    async fn dispatch_ready(&mut self) -> Result<bool> {
        let mut ready = Vec::new();
        let mut finished = false;

        while self.in_flight + ready.len() < self.options.max_workers {
            match self.plan.select_next() {
                Selection::Ready(node) => match &node.kind {
                    NodeKind::LocalTask { task } => ready.push(ScheduledTask {
                        node: node.id,
                        name: task.clone(),
                    }),
                    NodeKind::TaskInAnotherBuild { build, task } => {
                        // The owning build runs it; nothing to execute here.
                        info!(build = %build, task = %task, "delegated to another build");
                        self.plan.finish_node(node.id, TaskOutcome::Success)?;
                    }
                    NodeKind::OrdinalMarker { .. } => {
                        self.plan.finish_node(node.id, TaskOutcome::Success)?;
                    }
                },
                Selection::Waiting => break,
                Selection::Finished => {
                    finished = true;
                    break;
                }
            }
        }

        if !ready.is_empty() {
            let names: Vec<_> = ready.iter().map(|t| t.name.as_str()).collect();
            debug!(?names, "spawning ready tasks");
            self.in_flight += ready.len();
            self.executor.spawn_ready_tasks(ready).await?;
        }

        Ok(finished)
    }
}
