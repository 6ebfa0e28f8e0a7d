// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// A node lookup for a task that was never added to the plan.
    #[error("Task is not part of the execution plan, no dependency information is available: {0}")]
    TaskNotFound(String),

    /// The dependency resolver was asked about a task the build does not define.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Dependency cycle detected: {0}")]
    DependencyCycle(String),

    #[error("Could not resolve dependencies of {node}: {reason}")]
    ResolutionFailed { node: String, reason: String },

    #[error("The execution plan has already been finalized")]
    AlreadyFinalized,

    #[error("This execution plan already has nodes scheduled")]
    AlreadyScheduled,

    #[error("Invalid task filter: {0}")]
    InvalidFilter(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PlanError>;
