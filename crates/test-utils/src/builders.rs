#![allow(dead_code)]

use std::collections::BTreeMap;

use workplan::config::{BuildFile, BuildSection, IncludedBuild, RawBuildFile, TaskConfig};

/// Builder for `BuildFile` to simplify test setup.
pub struct BuildFileBuilder {
    raw: RawBuildFile,
}

impl BuildFileBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawBuildFile {
                build: BuildSection::default(),
                included: BTreeMap::new(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.raw.build.name = name.to_string();
        self
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.raw.task.insert(name.to_string(), task);
        self
    }

    pub fn with_included(mut self, build: &str, tasks: &[&str], executed: &[&str]) -> Self {
        self.raw.included.insert(
            build.to_string(),
            IncludedBuild {
                tasks: tasks.iter().map(|t| t.to_string()).collect(),
                executed: executed.iter().map(|t| t.to_string()).collect(),
            },
        );
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.raw.build.exclude.push(pattern.to_string());
        self
    }

    pub fn continue_on_failure(mut self, val: bool) -> Self {
        self.raw.build.continue_on_failure = val;
        self
    }

    pub fn max_workers(mut self, val: usize) -> Self {
        self.raw.build.max_workers = Some(val);
        self
    }

    pub fn raw(self) -> RawBuildFile {
        self.raw
    }

    pub fn build(self) -> BuildFile {
        BuildFile::try_from(self.raw).expect("Failed to build valid build file from builder")
    }
}

impl Default for BuildFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                depends_on: vec![],
                finalized_by: vec![],
                locks: vec![],
            },
        }
    }

    pub fn depends_on(mut self, dep: &str) -> Self {
        self.task.depends_on.push(dep.to_string());
        self
    }

    pub fn finalized_by(mut self, finalizer: &str) -> Self {
        self.task.finalized_by.push(finalizer.to_string());
        self
    }

    pub fn lock(mut self, name: &str) -> Self {
        self.task.locks.push(name.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
