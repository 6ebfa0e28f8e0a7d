use std::collections::{HashMap, HashSet};

use workplan::errors::{PlanError, Result};
use workplan::plan::{DependencyResolver, NodeArena, NodeId, NodeKind, ResolvedNode};

#[derive(Debug, Clone, Default)]
struct ScriptedNode {
    /// `(successor, hard)`
    dependencies: Vec<(NodeKind, bool)>,
    finalizers: Vec<NodeKind>,
    locks: Vec<String>,
}

/// In-memory `DependencyResolver` driven by explicitly declared edges.
///
/// Nodes without declarations resolve to no relationships. `fail_on` makes
/// resolution of a node return an error.
#[derive(Debug, Default)]
pub struct ScriptedResolver {
    nodes: HashMap<NodeKind, ScriptedNode>,
    failing: HashSet<NodeKind>,
    resolved: Vec<String>,
    clear_calls: usize,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// `from` depends on local task `to`; `to` joins `from`'s batch.
    pub fn dependency(self, from: &str, to: &str) -> Self {
        self.edge(NodeKind::local(from), NodeKind::local(to), true)
    }

    /// `from` depends on `to` without pulling it into `from`'s batch.
    pub fn soft_dependency(self, from: &str, to: &str) -> Self {
        self.edge(NodeKind::local(from), NodeKind::local(to), false)
    }

    /// `from` depends on `task` owned by `build`.
    pub fn other_build_dependency(self, from: &str, build: &str, task: &str) -> Self {
        self.edge(NodeKind::local(from), NodeKind::other_build(build, task), false)
    }

    pub fn finalized_by(mut self, target: &str, finalizer: &str) -> Self {
        self.nodes
            .entry(NodeKind::local(target))
            .or_default()
            .finalizers
            .push(NodeKind::local(finalizer));
        self
    }

    pub fn lock(mut self, task: &str, name: &str) -> Self {
        self.nodes
            .entry(NodeKind::local(task))
            .or_default()
            .locks
            .push(name.to_string());
        self
    }

    pub fn fail_on(mut self, task: &str) -> Self {
        self.failing.insert(NodeKind::local(task));
        self
    }

    fn edge(mut self, from: NodeKind, to: NodeKind, hard: bool) -> Self {
        self.nodes.entry(from).or_default().dependencies.push((to, hard));
        self
    }

    /// Display names of resolved nodes, in resolution order.
    pub fn resolved(&self) -> &[String] {
        &self.resolved
    }

    pub fn resolve_count(&self, name: &str) -> usize {
        self.resolved.iter().filter(|n| *n == name).count()
    }

    pub fn clear_calls(&self) -> usize {
        self.clear_calls
    }
}

impl DependencyResolver for ScriptedResolver {
    fn resolve(&mut self, node: NodeId, arena: &mut NodeArena) -> Result<ResolvedNode> {
        let kind = arena.node(node).kind().clone();
        self.resolved.push(kind.to_string());

        if self.failing.contains(&kind) {
            return Err(PlanError::Other(anyhow::anyhow!("scripted failure for {kind}")));
        }

        let Some(scripted) = self.nodes.get(&kind).cloned() else {
            return Ok(ResolvedNode::default());
        };

        let mut resolved = ResolvedNode {
            resource_locks: scripted.locks,
            ..ResolvedNode::default()
        };
        for (successor, hard) in scripted.dependencies {
            let id = arena.get_or_create(successor);
            if hard {
                resolved.hard_successors.push(id);
            }
            resolved.dependency_successors.push(id);
        }
        for finalizer in scripted.finalizers {
            resolved.finalizers.push(arena.get_or_create(finalizer));
        }
        Ok(resolved)
    }

    fn clear(&mut self) {
        self.clear_calls += 1;
    }
}
