// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `workplan`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "workplan",
    version,
    about = "Plan and run build tasks in dependency order.",
    long_about = None
)]
pub struct CliArgs {
    /// Tasks to run. Each one is submitted as its own batch, in order.
    ///
    /// Default: every task no other task depends on.
    #[arg(value_name = "TASK")]
    pub tasks: Vec<String>,

    /// Path to the build file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Workplan.toml")]
    pub config: String,

    /// Exclude tasks matching this glob (repeatable).
    #[arg(short = 'x', long = "exclude-task", value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Keep running independent tasks after a failure.
    #[arg(long = "continue")]
    pub continue_on_failure: bool,

    /// Print the execution order without running anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum number of tasks running at once.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_workers: Option<u64>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WORKPLAN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
