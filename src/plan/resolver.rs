// src/plan/resolver.rs

//! Dependency resolution seam.
//!
//! The plan builder never looks at task definitions itself. It asks a
//! [`DependencyResolver`] for the direct successors of each node it visits;
//! [`BuildFileResolver`] answers from a validated [`BuildFile`], tests supply
//! their own implementations.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::{BuildFile, TaskRef};
use crate::errors::{PlanError, Result};
use crate::plan::node::{NodeArena, NodeId, NodeKind};
use crate::types::TaskName;

/// Direct relationships of one node, as reported by a resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedNode {
    /// Successors that cannot be scheduled independently of this node and
    /// therefore join its ordinal group.
    pub hard_successors: Vec<NodeId>,
    /// Successors to discover and order before this node, in natural order.
    pub dependency_successors: Vec<NodeId>,
    /// Nodes that must run right after this node whenever it runs.
    pub finalizers: Vec<NodeId>,
    /// Named resource locks held exclusively while the node runs.
    pub resource_locks: Vec<String>,
}

/// Produces the direct successors of a node.
///
/// Implementations may create the successor nodes in `arena`. `clear` is
/// called once the plan no longer needs resolution (on finalize and close)
/// so implementations can drop cached state.
pub trait DependencyResolver {
    fn resolve(&mut self, node: NodeId, arena: &mut NodeArena) -> Result<ResolvedNode>;

    fn clear(&mut self);
}

/// References of a task, parsed once per plan.
#[derive(Debug, Clone)]
struct TaskReferences {
    dependencies: Vec<(NodeKind, bool)>,
    finalizers: Vec<NodeKind>,
    locks: Vec<String>,
}

/// Resolves nodes against the tasks of a build file.
///
/// - `depends_on` entries naming a local task become hard *and* dependency
///   successors.
/// - `depends_on` entries naming another build's task (`"lib:jar"`) are
///   dependency successors only: that build schedules them independently.
/// - `finalized_by` entries become finalizers.
#[derive(Debug)]
pub struct BuildFileResolver {
    build: Arc<BuildFile>,
    cache: HashMap<TaskName, TaskReferences>,
}

impl BuildFileResolver {
    pub fn new(build: Arc<BuildFile>) -> Self {
        Self {
            build,
            cache: HashMap::new(),
        }
    }

    pub fn cached_tasks(&self) -> usize {
        self.cache.len()
    }

    fn references_of(&mut self, task: &str) -> Result<TaskReferences> {
        if let Some(refs) = self.cache.get(task) {
            return Ok(refs.clone());
        }

        let cfg = self
            .build
            .task
            .get(task)
            .ok_or_else(|| PlanError::UnknownTask(task.to_string()))?;

        let dependencies = cfg
            .depends_on
            .iter()
            .map(|raw| match TaskRef::parse(raw) {
                TaskRef::Local(name) => (NodeKind::local(name), true),
                TaskRef::OtherBuild { build, task } => (NodeKind::other_build(build, task), false),
            })
            .collect();
        let finalizers = cfg.finalized_by.iter().map(NodeKind::local).collect();

        let refs = TaskReferences {
            dependencies,
            finalizers,
            locks: cfg.locks.clone(),
        };
        self.cache.insert(task.to_string(), refs.clone());
        Ok(refs)
    }

    fn executed_in_other_build(&self, build: &str, task: &str) -> bool {
        self.build
            .included
            .get(build)
            .is_some_and(|b| b.executed.iter().any(|t| t == task))
    }
}

impl DependencyResolver for BuildFileResolver {
    fn resolve(&mut self, node: NodeId, arena: &mut NodeArena) -> Result<ResolvedNode> {
        let task = match arena.node(node).kind() {
            NodeKind::LocalTask { task } => task.clone(),
            // Another build owns the relationships of its own tasks.
            NodeKind::TaskInAnotherBuild { .. } | NodeKind::OrdinalMarker { .. } => {
                return Ok(ResolvedNode::default());
            }
        };

        let refs = self.references_of(&task)?;
        let mut resolved = ResolvedNode {
            resource_locks: refs.locks,
            ..ResolvedNode::default()
        };

        for (kind, hard) in refs.dependencies {
            let executed = match &kind {
                NodeKind::TaskInAnotherBuild { build, task } => {
                    self.executed_in_other_build(build, task)
                }
                _ => false,
            };
            let id = arena.get_or_create(kind);
            if executed {
                arena.node_mut(id).mark_executed();
            }
            if hard {
                resolved.hard_successors.push(id);
            }
            resolved.dependency_successors.push(id);
        }

        for kind in refs.finalizers {
            resolved.finalizers.push(arena.get_or_create(kind));
        }

        debug!(
            task = %task,
            dependencies = resolved.dependency_successors.len(),
            finalizers = resolved.finalizers.len(),
            "resolved task relationships"
        );
        Ok(resolved)
    }

    fn clear(&mut self) {
        self.cache.clear();
    }
}
