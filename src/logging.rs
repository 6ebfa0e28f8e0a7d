// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Level priority: the `--log-level` flag, then the `WORKPLAN_LOG`
//! environment variable, then `info`. Logs go to STDERR; stdout carries
//! task output and the dry-run listing.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "WORKPLAN_LOG";

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = resolve_level(cli_level, std::env::var(LOG_ENV_VAR).ok().as_deref());

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing log subscriber: {e}"))?;

    Ok(())
}

/// Effective level from the CLI flag and the environment value.
pub fn resolve_level(cli_level: Option<LogLevel>, env_value: Option<&str>) -> Level {
    match cli_level {
        Some(lvl) => level_from_log_level(lvl),
        None => env_value.and_then(parse_level_str).unwrap_or(Level::INFO),
    }
}

fn level_from_log_level(lvl: LogLevel) -> Level {
    match lvl {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
