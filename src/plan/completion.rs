// src/plan/completion.rs

use std::fmt;
use std::sync::Arc;

use crate::plan::node::NodeId;
use crate::types::{TaskName, TaskOutcome};

/// A local task node that finished executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedNode {
    pub id: NodeId,
    pub task: TaskName,
    pub outcome: TaskOutcome,
}

pub type CompletionHandler = Arc<dyn Fn(&CompletedNode) + Send + Sync>;

/// Handlers registered through `ExecutionPlan::on_complete`, called in
/// registration order for every completed local task.
#[derive(Clone, Default)]
pub struct CompletionHooks {
    handlers: Vec<CompletionHandler>,
}

impl CompletionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handler: CompletionHandler) {
        self.handlers.push(handler);
    }

    pub fn notify(&self, node: &CompletedNode) {
        for handler in &self.handlers {
            handler(node);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for CompletionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHooks")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
