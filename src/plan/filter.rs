// src/plan/filter.rs

//! Predicates deciding which tasks a plan may execute.
//!
//! Only local task nodes are filtered; nodes of other builds and synthetic
//! nodes always pass.

use std::fmt;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::errors::{PlanError, Result};

pub trait TaskFilter: Send + Sync {
    fn is_satisfied_by(&self, task: &str) -> bool;
}

impl<F> TaskFilter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_satisfied_by(&self, task: &str) -> bool {
        self(task)
    }
}

/// Accepts every task.
#[derive(Debug, Clone, Copy, Default)]
pub struct SatisfyAll;

impl TaskFilter for SatisfyAll {
    fn is_satisfied_by(&self, _task: &str) -> bool {
        true
    }
}

/// Rejects tasks whose name matches any of a set of globs (`-x lint*`).
pub struct ExcludeTasks {
    patterns: Vec<String>,
    set: GlobSet,
}

impl ExcludeTasks {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern)
                .map_err(|e| PlanError::InvalidFilter(format!("'{pattern}': {e}")))?;
            builder.add(glob);
            kept.push(pattern.to_string());
        }
        let set = builder
            .build()
            .map_err(|e| PlanError::InvalidFilter(e.to_string()))?;
        Ok(Self {
            patterns: kept,
            set,
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl fmt::Debug for ExcludeTasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExcludeTasks")
            .field("patterns", &self.patterns)
            .finish_non_exhaustive()
    }
}

impl TaskFilter for ExcludeTasks {
    fn is_satisfied_by(&self, task: &str) -> bool {
        !self.set.is_match(task)
    }
}
