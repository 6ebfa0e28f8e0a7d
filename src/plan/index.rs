// src/plan/index.rs

//! Insertion-ordered registry of the nodes in a plan.

use std::collections::{HashMap, HashSet};

use crate::errors::{PlanError, Result};
use crate::plan::node::{Node, NodeId};
use crate::types::TaskName;

#[derive(Debug, Clone)]
struct IndexEntry {
    id: NodeId,
    task: Option<TaskName>,
    public: bool,
}

/// Every node added to a plan, in insertion order, plus a lookup from task
/// name to the node of that task.
///
/// Insertion order is the default iteration and reporting order, and the
/// tie-break used when ordering otherwise unrelated nodes.
#[derive(Debug, Default)]
pub struct NodeIndex {
    entries: Vec<IndexEntry>,
    members: HashSet<NodeId>,
    by_task: HashMap<TaskName, NodeId>,
}

impl NodeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the node was newly inserted.
    pub fn add(&mut self, id: NodeId, node: &Node) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        let task = node.kind().local_task().cloned();
        if let Some(task) = &task {
            self.by_task.insert(task.clone(), id);
        }
        self.entries.push(IndexEntry {
            id,
            task,
            public: node.is_public(),
        });
        true
    }

    /// Node of a local task.
    ///
    /// Asking for a task that was never added is a caller defect: dependency
    /// information for it has not been discovered.
    pub fn get(&self, task: &str) -> Result<NodeId> {
        self.by_task
            .get(task)
            .copied()
            .ok_or_else(|| PlanError::TaskNotFound(task.to_string()))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    /// Local tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskName> {
        self.entries.iter().filter_map(|e| e.task.as_ref())
    }

    /// Number of nodes that count toward the externally reported plan size.
    pub fn count_public(&self) -> usize {
        self.entries.iter().filter(|e| e.public).count()
    }

    /// Keep only the first `count` inserted nodes and return the removed ones.
    pub fn retain_first(&mut self, count: usize) -> Vec<NodeId> {
        if count >= self.entries.len() {
            return Vec::new();
        }
        let removed = self.entries.split_off(count);
        for entry in &removed {
            self.members.remove(&entry.id);
            if let Some(task) = &entry.task {
                self.by_task.remove(task);
            }
        }
        removed.into_iter().map(|e| e.id).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.members.clear();
        self.by_task.clear();
    }
}
