use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use workplan::engine::RuntimeEvent;
use workplan::errors::{PlanError, Result};
use workplan::exec::{ExecutorBackend, ScheduledTask};
use workplan::types::TaskOutcome;

/// A fake executor that:
/// - records which tasks were "run", in dispatch order
/// - immediately reports `NodeCompleted` for each of them, failing the
///   tasks listed with `failing`.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    failing: HashSet<String>,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, executed: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            runtime_tx,
            executed,
            failing: HashSet::new(),
        }
    }

    pub fn failing(mut self, task: &str) -> Self {
        self.failing.insert(task.to_string());
        self
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let failing = self.failing.clone();

        Box::pin(async move {
            for t in tasks {
                {
                    let mut guard = executed.lock().unwrap();
                    guard.push(t.name.clone());
                }

                let outcome = if failing.contains(&t.name) {
                    TaskOutcome::Failed(1)
                } else {
                    TaskOutcome::Success
                };
                tx.send(RuntimeEvent::NodeCompleted {
                    node: t.node,
                    task: t.name.clone(),
                    outcome,
                })
                .await
                .map_err(|e| PlanError::Other(anyhow::anyhow!("runtime channel closed: {e}")))?;
            }
            Ok(())
        })
    }
}
