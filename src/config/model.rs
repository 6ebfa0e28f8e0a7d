// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::TaskName;

/// Top-level build file as read from TOML, before validation.
///
/// ```toml
/// [build]
/// name = "app"
/// continue_on_failure = false
/// exclude = ["lint*"]
///
/// [included.lib]
/// tasks = ["jar"]
/// executed = ["jar"]
///
/// [task.compile]
/// cmd = "cargo build"
/// depends_on = ["generate", "lib:jar"]
/// finalized_by = ["report"]
/// locks = ["target"]
/// ```
///
/// All sections except `[task.<name>]` are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBuildFile {
    #[serde(default)]
    pub build: BuildSection,

    /// Other builds whose tasks may be referenced as `"<build>:<task>"`.
    #[serde(default)]
    pub included: BTreeMap<String, IncludedBuild>,

    /// Keys are the task names.
    #[serde(default)]
    pub task: BTreeMap<TaskName, TaskConfig>,
}

/// A validated build file.
///
/// Only obtainable through `TryFrom<RawBuildFile>` (see `validate.rs`), so
/// every dependency reference inside is known to point at a defined task.
#[derive(Debug, Clone)]
pub struct BuildFile {
    pub build: BuildSection,
    pub included: BTreeMap<String, IncludedBuild>,
    pub task: BTreeMap<TaskName, TaskConfig>,
}

impl BuildFile {
    pub(crate) fn new_unchecked(
        build: BuildSection,
        included: BTreeMap<String, IncludedBuild>,
        task: BTreeMap<TaskName, TaskConfig>,
    ) -> Self {
        Self {
            build,
            included,
            task,
        }
    }

    /// Tasks that no other task lists in `depends_on` or `finalized_by`.
    ///
    /// These are requested when the command line names no task.
    pub fn default_tasks(&self) -> Vec<TaskName> {
        self.task
            .keys()
            .filter(|name| {
                !self.task.values().any(|t| {
                    t.depends_on.iter().any(|d| d == *name)
                        || t.finalized_by.iter().any(|f| f == *name)
                })
            })
            .cloned()
            .collect()
    }
}

/// `[build]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSection {
    /// Display name of the execution plan.
    #[serde(default = "default_build_name")]
    pub name: String,

    /// Keep running independent work after a failure.
    #[serde(default)]
    pub continue_on_failure: bool,

    /// Task-name globs excluded from every plan (merged with `-x`).
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Maximum number of nodes executing at once. `None` means one per core.
    #[serde(default)]
    pub max_workers: Option<usize>,
}

fn default_build_name() -> String {
    "build".to_string()
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            name: default_build_name(),
            continue_on_failure: false,
            exclude: Vec::new(),
            max_workers: None,
        }
    }
}

/// `[included.<build>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct IncludedBuild {
    /// Tasks of that build which may be referenced from this one.
    #[serde(default)]
    pub tasks: Vec<TaskName>,

    /// Tasks that build has already executed.
    #[serde(default)]
    pub executed: Vec<TaskName>,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// The shell command to execute.
    pub cmd: String,

    /// Tasks that must complete successfully before this one.
    ///
    /// Entries of the form `"<build>:<task>"` refer to another build.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Tasks that run right after this one whenever this one runs.
    #[serde(default)]
    pub finalized_by: Vec<TaskName>,

    /// Named resource locks held exclusively while the task runs.
    #[serde(default)]
    pub locks: Vec<String>,
}

/// A parsed `depends_on` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRef<'a> {
    Local(&'a str),
    OtherBuild { build: &'a str, task: &'a str },
}

impl<'a> TaskRef<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match raw.split_once(':') {
            Some((build, task)) => TaskRef::OtherBuild { build, task },
            None => TaskRef::Local(raw),
        }
    }
}
