// src/lib.rs

pub mod cli;
pub mod config;
pub mod coordination;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod plan;
pub mod types;

use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{BuildFile, load_and_validate};
use crate::coordination::LockCoordinator;
use crate::engine::{Runtime, RuntimeEvent, RuntimeOptions};
use crate::errors::PlanError;
use crate::exec::RealExecutorBackend;
use crate::plan::{BuildFileResolver, ExcludeTasks, ExecutionPlan, ExecutionSummary, NodeState};
use crate::types::TaskOutcome;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - build file loading
/// - plan construction and ordering
/// - runtime + executor
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let build = Arc::new(load_and_validate(&args.config)?);
    let mut plan = build_plan(&build, &args)?;

    if args.dry_run {
        print_dry_run(&mut plan)?;
        return Ok(());
    }

    plan.on_complete(|completed| match completed.outcome {
        TaskOutcome::Success => debug!(task = %completed.task, "completion recorded"),
        TaskOutcome::Failed(code) => {
            debug!(task = %completed.task, exit_code = code, "failure recorded")
        }
    });
    let finalized = plan.finalize_plan()?;

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executor = RealExecutorBackend::new(&build, rt_tx.clone());

    // Ctrl-C -> graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let max_workers = args
        .max_workers
        .map(|n| n as usize)
        .or(build.build.max_workers);
    let runtime = Runtime::new(
        finalized,
        rt_rx,
        executor,
        RuntimeOptions::with_max_workers(max_workers),
    );
    let summary = runtime.run().await?;

    print_summary(&summary);
    plan.close();

    let failed = summary.failed();
    if !failed.is_empty() {
        bail!("{} task(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

/// Build the plan for the tasks requested on the command line.
///
/// Each named task becomes its own batch, in command-line order. With no
/// task named, the build's default tasks form a single batch.
pub fn build_plan(
    build: &Arc<BuildFile>,
    args: &CliArgs,
) -> std::result::Result<ExecutionPlan<BuildFileResolver>, PlanError> {
    let coordinator = Arc::new(LockCoordinator::new());
    let mut plan = ExecutionPlan::new(
        build.build.name.clone(),
        BuildFileResolver::new(Arc::clone(build)),
        coordinator,
    );

    let patterns: Vec<&String> = build.build.exclude.iter().chain(&args.exclude).collect();
    if !patterns.is_empty() {
        plan.use_filter(ExcludeTasks::new(patterns)?);
    }
    plan.set_continue_on_failure(args.continue_on_failure || build.build.continue_on_failure);

    let batches: Vec<Vec<String>> = if args.tasks.is_empty() {
        vec![build.default_tasks()]
    } else {
        args.tasks.iter().map(|t| vec![t.clone()]).collect()
    };

    for batch in batches {
        if let Some(unknown) = batch.iter().find(|t| !build.task.contains_key(*t)) {
            return Err(PlanError::UnknownTask(unknown.clone()));
        }
        plan.submit_entry_tasks(batch)?;
    }

    info!(
        plan = %plan.display_name(),
        requested = ?plan.requested_tasks(),
        size = plan.size(),
        "plan built"
    );
    Ok(plan)
}

/// Print the execution order without running anything.
fn print_dry_run(plan: &mut ExecutionPlan<BuildFileResolver>) -> Result<()> {
    let name = plan.display_name().to_string();
    let schedule = plan.determine_execution_plan()?;

    println!("workplan dry-run: {name}");
    println!();
    println!("order ({}):", schedule.order().len());
    for (i, task) in schedule.order().iter().enumerate() {
        println!("  {:>3}. {task}", i + 1);
    }

    if !schedule.filtered().is_empty() {
        println!();
        println!("excluded ({}):", schedule.filtered().len());
        for kind in schedule.filtered() {
            println!("  - {kind}");
        }
    }

    println!();
    println!("fingerprint: {}", schedule.fingerprint());

    debug!("dry-run complete (no execution)");
    Ok(())
}

fn print_summary(summary: &ExecutionSummary) {
    println!();
    for (task, state) in summary.results() {
        let label = match state {
            NodeState::Succeeded => "ok".to_string(),
            NodeState::Failed(code) => format!("FAILED (exit {code})"),
            NodeState::Skipped => "skipped".to_string(),
            NodeState::NotRun => "not run".to_string(),
            NodeState::Waiting | NodeState::Running => "interrupted".to_string(),
        };
        println!("  {task:<30} {label}");
    }
    println!(
        "{} succeeded, {} failed, {} skipped",
        summary.succeeded().len(),
        summary.failed().len(),
        summary.skipped().len()
    );
}
