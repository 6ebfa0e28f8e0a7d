// src/exec/executor_loop.rs

//! Main executor loop that manages running task processes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::RuntimeEvent;
use crate::exec::ScheduledTask;
use crate::exec::task_runner::run_task;
use crate::plan::NodeId;
use crate::types::{TaskName, TaskOutcome};

/// Requests understood by the executor loop.
#[derive(Debug, Clone)]
pub enum ExecutorCommand {
    Run(ScheduledTask),
    /// Kill every running process (shutdown).
    CancelAll,
}

/// Internal handle for a currently-running task process.
struct ActiveTask {
    name: TaskName,
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// Each task runs in its own Tokio task. `commands` maps task names to the
/// shell command to run; a task without a command fails with exit code -1.
pub fn spawn_executor(
    commands: Arc<HashMap<TaskName, String>>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> mpsc::Sender<ExecutorCommand> {
    let (tx, mut rx) = mpsc::channel::<ExecutorCommand>(32);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<NodeId, ActiveTask> = HashMap::new();

        while let Some(command) = rx.recv().await {
            active.retain(|_, t| !t.handle.is_finished());
            match command {
                ExecutorCommand::Run(task) => {
                    start_task(task, &commands, &mut active, &runtime_tx).await;
                }
                ExecutorCommand::CancelAll => cancel_all(&mut active),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

async fn start_task(
    task: ScheduledTask,
    commands: &HashMap<TaskName, String>,
    active: &mut HashMap<NodeId, ActiveTask>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    let Some(cmd) = commands.get(&task.name).cloned() else {
        warn!(task = %task.name, "task has no command; reporting failure");
        let _ = runtime_tx
            .send(RuntimeEvent::NodeCompleted {
                node: task.node,
                task: task.name,
                outcome: TaskOutcome::Failed(-1),
            })
            .await;
        return;
    };

    if active.contains_key(&task.node) {
        warn!(task = %task.name, "task is already running; ignoring duplicate dispatch");
        return;
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = runtime_tx.clone();
    let node = task.node;
    let name = task.name.clone();
    let spawn_name = name.clone();

    let handle = tokio::spawn(async move {
        run_task(task, cmd, rt_tx, cancel_rx).await;
        debug!(task = %spawn_name, "task runner future finished");
    });

    active.insert(
        node,
        ActiveTask {
            name,
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn cancel_all(active: &mut HashMap<NodeId, ActiveTask>) {
    for (_, mut task) in active.drain() {
        info!(task = %task.name, "cancelling running task");
        if let Some(cancel) = task.cancel.take() {
            if cancel.send(()).is_err() {
                debug!(task = %task.name, "process already finished while cancelling");
            }
        }
    }
}
