// src/exec/task_runner.rs

//! Individual task process runner.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::RuntimeEvent;
use crate::exec::ScheduledTask;
use crate::types::TaskOutcome;

/// Run a single task process and report its outcome as `NodeCompleted`.
///
/// If the cancel channel fires, the child process is killed and no
/// completion is reported for it.
pub async fn run_task(
    task: ScheduledTask,
    cmd: String,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel_rx: oneshot::Receiver<()>,
) {
    let node = task.node;
    let task_name = task.name.clone();
    if let Err(err) = run_task_inner(task, cmd, &runtime_tx, cancel_rx).await {
        error!(task = %task_name, error = %err, "task execution error");
        let _ = runtime_tx
            .send(RuntimeEvent::NodeCompleted {
                node,
                task: task_name,
                outcome: TaskOutcome::Failed(-1),
            })
            .await;
    }
}

async fn run_task_inner(
    task: ScheduledTask,
    cmd: String,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<()> {
    info!(task = %task.name, cmd = %cmd, "starting task process");

    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&cmd);
        c
    };

    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task.name))?;

    // Forward stdout to our stdout, prefixed by the task name.
    if let Some(stdout) = child.stdout.take() {
        let task_name = task.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                println!("[{task_name}] {line}");
            }
        });
    }

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let task_name = task.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_name, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res.with_context(|| {
                format!("waiting for process of task '{}'", task.name)
            })?;

            let code = status.code().unwrap_or(-1);
            let outcome = if status.success() {
                TaskOutcome::Success
            } else {
                TaskOutcome::Failed(code)
            };

            info!(
                task = %task.name,
                exit_code = code,
                success = status.success(),
                "task process exited"
            );

            runtime_tx
                .send(RuntimeEvent::NodeCompleted {
                    node: task.node,
                    task: task.name.clone(),
                    outcome,
                })
                .await
                .with_context(|| {
                    format!("sending NodeCompleted event for task '{}' to runtime", task.name)
                })?;
        }

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => {
                    info!(task = %task.name, "cancellation requested; killing process");
                    if let Err(e) = child.kill().await {
                        warn!(task = %task.name, error = %e, "failed to kill child process on cancellation");
                    }
                }
                Err(e) => {
                    debug!(
                        task = %task.name,
                        error = %e,
                        "cancel channel closed without explicit cancellation"
                    );
                    // Child will be killed on drop due to kill_on_drop(true).
                }
            }
        }
    }

    Ok(())
}
