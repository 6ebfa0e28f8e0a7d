// src/config/validate.rs

use globset::Glob;

use crate::config::model::{BuildFile, RawBuildFile, TaskRef};
use crate::errors::{PlanError, Result};

impl TryFrom<RawBuildFile> for BuildFile {
    type Error = PlanError;

    fn try_from(raw: RawBuildFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_build_file(&raw)?;
        Ok(BuildFile::new_unchecked(raw.build, raw.included, raw.task))
    }
}

/// Run every semantic check on a freshly deserialized build file.
///
/// Dependency cycles are deliberately not checked here: the execution plan
/// reports them while discovering the graph.
pub fn validate_raw_build_file(cfg: &RawBuildFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_build_section(cfg)?;
    validate_task_references(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawBuildFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(PlanError::ConfigError(
            "build file must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_build_section(cfg: &RawBuildFile) -> Result<()> {
    if cfg.build.max_workers == Some(0) {
        return Err(PlanError::ConfigError(
            "[build].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }

    for pattern in &cfg.build.exclude {
        Glob::new(pattern).map_err(|e| {
            PlanError::ConfigError(format!("[build].exclude has invalid glob '{pattern}': {e}"))
        })?;
    }

    for (build, included) in &cfg.included {
        for executed in &included.executed {
            if !included.tasks.contains(executed) {
                return Err(PlanError::ConfigError(format!(
                    "included build '{build}' lists '{executed}' as executed but not in `tasks`"
                )));
            }
        }
    }

    Ok(())
}

fn validate_task_references(cfg: &RawBuildFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.depends_on.iter() {
            match TaskRef::parse(dep) {
                TaskRef::Local(local) => {
                    if !cfg.task.contains_key(local) {
                        return Err(PlanError::ConfigError(format!(
                            "task '{name}' has unknown dependency '{local}' in `depends_on`"
                        )));
                    }
                    if local == name {
                        return Err(PlanError::ConfigError(format!(
                            "task '{name}' cannot depend on itself in `depends_on`"
                        )));
                    }
                }
                TaskRef::OtherBuild { build, task: other } => {
                    let known = cfg
                        .included
                        .get(build)
                        .is_some_and(|b| b.tasks.iter().any(|t| t == other));
                    if !known {
                        return Err(PlanError::ConfigError(format!(
                            "task '{name}' depends on '{dep}', which no [included.{build}] section declares"
                        )));
                    }
                }
            }
        }

        for finalizer in task.finalized_by.iter() {
            if !cfg.task.contains_key(finalizer) {
                return Err(PlanError::ConfigError(format!(
                    "task '{name}' has unknown finalizer '{finalizer}' in `finalized_by`"
                )));
            }
            if finalizer == name {
                return Err(PlanError::ConfigError(format!(
                    "task '{name}' cannot finalize itself"
                )));
            }
        }
    }
    Ok(())
}
