// src/plan/node.rs

//! Nodes of the execution graph and the arena that owns them.
//!
//! Nodes are addressed by [`NodeId`] handles into a [`NodeArena`]. The arena
//! lives as long as the plan builder, so the same node (and id) is handed out
//! again for the same work item after the plan has been closed and reused.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::plan::resolver::ResolvedNode;
use crate::types::TaskName;

/// Stable handle of a node inside a [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node stands for.
///
/// The derived `Ord` is the fixed node comparator used to sort entry points
/// before they are submitted: local tasks by name, then tasks of other
/// builds, then synthetic markers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    /// A task of the build this plan belongs to.
    LocalTask { task: TaskName },
    /// A task owned by another build; its execution is delegated.
    TaskInAnotherBuild { build: String, task: TaskName },
    /// Synthetic join point separating two submission batches.
    OrdinalMarker { ordinal: u32 },
}

impl NodeKind {
    pub fn local(task: impl Into<TaskName>) -> Self {
        NodeKind::LocalTask { task: task.into() }
    }

    pub fn other_build(build: impl Into<String>, task: impl Into<TaskName>) -> Self {
        NodeKind::TaskInAnotherBuild {
            build: build.into(),
            task: task.into(),
        }
    }

    /// The task of a local task node. Other variants have none.
    pub fn local_task(&self) -> Option<&TaskName> {
        match self {
            NodeKind::LocalTask { task } => Some(task),
            _ => None,
        }
    }

    /// Whether the node counts toward the reported size of a plan.
    pub fn is_public(&self) -> bool {
        !matches!(self, NodeKind::OrdinalMarker { .. })
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::LocalTask { task } => write!(f, "{task}"),
            NodeKind::TaskInAnotherBuild { build, task } => write!(f, "{build}:{task}"),
            NodeKind::OrdinalMarker { ordinal } => write!(f, "<ordinal {ordinal}>"),
        }
    }
}

/// Per-plan and terminal state bits of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NodeFlags {
    required: bool,
    filtered: bool,
    dependencies_processed: bool,
    /// Terminal: survives `reset`.
    cannot_run_in_any_plan: bool,
    /// Terminal: the work item has already been executed (by this or another build).
    executed: bool,
}

/// A schedulable unit of work.
#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,
    /// Ordinal group the node belongs to, if any.
    group: Option<u32>,
    flags: NodeFlags,
    /// Successors that inherit this node's ordinal group.
    hard_successors: Vec<NodeId>,
    /// Successors that must be discovered (and ordered) before this node.
    dependency_successors: Vec<NodeId>,
    /// Nodes that must run right after this one.
    finalizers: Vec<NodeId>,
    resource_locks: Vec<String>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            group: None,
            flags: NodeFlags::default(),
            hard_successors: Vec::new(),
            dependency_successors: Vec::new(),
            finalizers: Vec::new(),
            resource_locks: Vec::new(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn group(&self) -> Option<u32> {
        self.group
    }

    pub fn is_public(&self) -> bool {
        self.kind.is_public()
    }

    pub fn is_required(&self) -> bool {
        self.flags.required
    }

    pub fn is_filtered(&self) -> bool {
        self.flags.filtered
    }

    pub fn dependencies_processed(&self) -> bool {
        self.flags.dependencies_processed
    }

    pub fn cannot_run_in_any_plan(&self) -> bool {
        self.flags.cannot_run_in_any_plan
    }

    pub fn is_executed(&self) -> bool {
        self.flags.executed
    }

    pub fn hard_successors(&self) -> &[NodeId] {
        &self.hard_successors
    }

    pub fn dependency_successors(&self) -> &[NodeId] {
        &self.dependency_successors
    }

    pub fn finalizers(&self) -> &[NodeId] {
        &self.finalizers
    }

    pub fn resource_locks(&self) -> &[String] {
        &self.resource_locks
    }

    pub(crate) fn require(&mut self) {
        self.flags.required = true;
    }

    pub(crate) fn mark_filtered(&mut self) {
        self.flags.filtered = true;
    }

    pub(crate) fn mark_dependencies_processed(&mut self) {
        debug_assert!(
            !self.flags.dependencies_processed,
            "dependencies of {} processed twice",
            self.kind
        );
        self.flags.dependencies_processed = true;
    }

    pub fn mark_cannot_run_in_any_plan(&mut self) {
        self.flags.cannot_run_in_any_plan = true;
    }

    pub fn mark_executed(&mut self) {
        self.flags.executed = true;
    }

    /// Join `group` unless the node already belongs to an earlier one.
    ///
    /// Returns `true` if the node's group changed. Inheriting never moves a
    /// node to a later batch.
    pub(crate) fn maybe_inherit_ordinal(&mut self, group: Option<u32>) -> bool {
        match (self.group, group) {
            (_, None) => false,
            (None, Some(new)) => {
                self.group = Some(new);
                true
            }
            (Some(current), Some(new)) if new < current => {
                self.group = Some(new);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn apply_resolution(&mut self, resolved: ResolvedNode) {
        self.hard_successors = resolved.hard_successors;
        self.dependency_successors = resolved.dependency_successors;
        self.finalizers = resolved.finalizers;
        self.resource_locks = resolved.resource_locks;
    }

    /// Clear everything that belongs to a single plan.
    pub(crate) fn reset(&mut self) {
        let NodeFlags {
            cannot_run_in_any_plan,
            executed,
            ..
        } = self.flags;
        self.flags = NodeFlags {
            cannot_run_in_any_plan,
            executed,
            ..NodeFlags::default()
        };
        self.group = None;
        self.hard_successors.clear();
        self.dependency_successors.clear();
        self.finalizers.clear();
        self.resource_locks.clear();
    }
}

/// Owner of every node ever created for a plan builder.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
    by_kind: HashMap<NodeKind, NodeId>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the node for `kind`, creating it on first reference.
    pub fn get_or_create(&mut self, kind: NodeKind) -> NodeId {
        if let Some(id) = self.by_kind.get(&kind) {
            return *id;
        }
        let id = NodeId(self.nodes.len());
        self.by_kind.insert(kind.clone(), id);
        self.nodes.push(Node::new(kind));
        id
    }

    pub fn find(&self, kind: &NodeKind) -> Option<NodeId> {
        self.by_kind.get(kind).copied()
    }

    /// Ids are only ever produced by this arena, so lookups cannot miss.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node comparator applied to entry points.
    pub fn compare(&self, a: NodeId, b: NodeId) -> Ordering {
        self.node(a).kind.cmp(&self.node(b).kind)
    }

    /// Human readable name of a node, for logs and errors.
    pub fn describe(&self, id: NodeId) -> String {
        self.node(id).kind.to_string()
    }
}
