// src/types.rs

/// Canonical task name type used throughout the crate.
pub type TaskName = String;

/// Outcome of executing a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed(i32),
}

impl TaskOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, TaskOutcome::Success)
    }
}

/// What the runner does with the rest of the graph once a node fails.
///
/// - `StopOnFailure`: nothing new is dispatched (finalizers of nodes that
///   already executed still run).
/// - `ContinueOnFailure`: only the nodes depending on the failure are
///   skipped; independent work keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    StopOnFailure,
    ContinueOnFailure,
}

impl From<bool> for FailurePolicy {
    fn from(continue_on_failure: bool) -> Self {
        if continue_on_failure {
            FailurePolicy::ContinueOnFailure
        } else {
            FailurePolicy::StopOnFailure
        }
    }
}
