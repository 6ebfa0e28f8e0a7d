// src/plan/builder.rs

//! The execution plan builder.
//!
//! Callers submit batches of entry points; each batch is expanded into the
//! full set of required nodes by a depth-first walk over a double-ended work
//! queue. The mutation methods here are NOT thread safe: callers serialize
//! access (they take `&mut self`). Once finalized, the plan hands a
//! [`FinalizedPlan`] to concurrent readers.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::coordination::LockCoordinator;
use crate::errors::{PlanError, Result};
use crate::plan::completion::{CompletedNode, CompletionHooks};
use crate::plan::filter::{SatisfyAll, TaskFilter};
use crate::plan::finalized::FinalizedPlan;
use crate::plan::index::NodeIndex;
use crate::plan::node::{Node, NodeArena, NodeId, NodeKind};
use crate::plan::ordering::{OrderingInputs, Schedule, determine_schedule};
use crate::plan::ordinal::OrdinalRegistry;
use crate::plan::resolver::{DependencyResolver, ResolvedNode};
use crate::types::{FailurePolicy, TaskName};

/// Insertion-ordered set of node ids.
#[derive(Debug, Default)]
struct NodeSet {
    order: Vec<NodeId>,
    members: HashSet<NodeId>,
}

impl NodeSet {
    fn insert(&mut self, id: NodeId) -> bool {
        if self.members.insert(id) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    fn as_slice(&self) -> &[NodeId] {
        &self.order
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

/// How a node came to be on the discovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Entry,
    Dependency,
    Finalizer,
}

/// A node of a graph computed elsewhere, for [`ExecutionPlan::set_precomputed_nodes`].
///
/// `dependencies` and `finalizers` are positions in the same list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecomputedNode {
    pub kind: NodeKind,
    pub dependencies: Vec<usize>,
    pub finalizers: Vec<usize>,
    pub resource_locks: Vec<String>,
}

impl PrecomputedNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            dependencies: Vec::new(),
            finalizers: Vec::new(),
            resource_locks: Vec::new(),
        }
    }
}

/// Builds the set of nodes to run, and their required order, for one build.
pub struct ExecutionPlan<R: DependencyResolver> {
    display_name: String,
    arena: NodeArena,
    resolver: R,
    entry_nodes: NodeSet,
    index: NodeIndex,
    filtered_nodes: NodeSet,
    finalizers: NodeSet,
    ordinals: OrdinalRegistry,
    filter: Box<dyn TaskFilter>,
    next_ordinal: u32,
    requires_scheduling: bool,
    precomputed: bool,
    continue_on_failure: bool,
    completion_hooks: CompletionHooks,
    schedule: Option<Schedule>,
    finalized: Option<FinalizedPlan>,
    coordinator: Arc<LockCoordinator>,
}

impl<R: DependencyResolver> std::fmt::Debug for ExecutionPlan<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("display_name", &self.display_name)
            .field("entry_nodes", &self.entry_nodes.len())
            .field("nodes", &self.index.len())
            .field("filtered", &self.filtered_nodes.len())
            .field("requires_scheduling", &self.requires_scheduling)
            .field("finalized", &self.finalized.is_some())
            .finish_non_exhaustive()
    }
}

impl<R: DependencyResolver> ExecutionPlan<R> {
    pub fn new(display_name: impl Into<String>, resolver: R, coordinator: Arc<LockCoordinator>) -> Self {
        Self {
            display_name: display_name.into(),
            arena: NodeArena::new(),
            resolver,
            entry_nodes: NodeSet::default(),
            index: NodeIndex::new(),
            filtered_nodes: NodeSet::default(),
            finalizers: NodeSet::default(),
            ordinals: OrdinalRegistry::new(),
            filter: Box::new(SatisfyAll),
            next_ordinal: 0,
            requires_scheduling: false,
            precomputed: false,
            continue_on_failure: false,
            completion_hooks: CompletionHooks::new(),
            schedule: None,
            finalized: None,
            coordinator,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    /// Access to the arena, e.g. to create nodes for [`Self::add_entry_nodes`].
    pub fn arena_mut(&mut self) -> &mut NodeArena {
        &mut self.arena
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn node_index(&self) -> &NodeIndex {
        &self.index
    }

    pub fn ordinals(&self) -> &OrdinalRegistry {
        &self.ordinals
    }

    /// Only affects nodes that have not been discovered yet.
    pub fn use_filter(&mut self, filter: impl TaskFilter + 'static) {
        self.filter = Box::new(filter);
    }

    pub fn set_continue_on_failure(&mut self, continue_on_failure: bool) {
        self.continue_on_failure = continue_on_failure;
    }

    pub fn continue_on_failure(&self) -> bool {
        self.continue_on_failure
    }

    pub fn requires_scheduling(&self) -> bool {
        self.requires_scheduling
    }

    /// Submit tasks as the next batch.
    pub fn submit_entry_tasks<I, S>(&mut self, tasks: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        let ordinal = self.next_ordinal;
        self.submit_entry_points(tasks, ordinal)
    }

    /// Submit tasks as the batch with the given ordinal.
    pub fn submit_entry_points<I, S>(&mut self, tasks: I, ordinal: u32) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        self.ensure_not_finalized()?;
        let nodes: Vec<NodeId> = tasks
            .into_iter()
            .map(|task| self.arena.get_or_create(NodeKind::local(task)))
            .collect();
        self.add_entry_nodes_with_ordinal(&nodes, ordinal)
    }

    /// Submit existing nodes (of any kind) as the next batch.
    pub fn add_entry_nodes(&mut self, nodes: &[NodeId]) -> Result<()> {
        let ordinal = self.next_ordinal;
        self.add_entry_nodes_with_ordinal(nodes, ordinal)
    }

    pub fn add_entry_nodes_with_ordinal(&mut self, nodes: &[NodeId], ordinal: u32) -> Result<()> {
        self.ensure_not_finalized()?;

        // Discovery order must not depend on the caller's iteration order.
        let mut sorted = nodes.to_vec();
        sorted.sort_by(|a, b| self.arena.compare(*a, *b));
        sorted.dedup();

        self.next_ordinal = self.next_ordinal.max(ordinal.saturating_add(1));
        self.requires_scheduling = true;

        info!(
            plan = %self.display_name,
            ordinal,
            entries = sorted.len(),
            "adding entry nodes"
        );

        let mut queue = VecDeque::with_capacity(sorted.len());
        for id in sorted {
            self.arena.node_mut(id).maybe_inherit_ordinal(Some(ordinal));
            self.ordinals.group(ordinal).add_entry_node(id);
            self.entry_nodes.insert(id);
            queue.push_back((id, Link::Entry));
        }

        self.discover_node_relationships(queue)
    }

    /// Seed the plan with a graph that was computed elsewhere.
    ///
    /// Nodes are added as entry nodes, in the given order, without asking the
    /// resolver. Only allowed on a plan that has nothing scheduled yet.
    pub fn set_precomputed_nodes(&mut self, nodes: Vec<PrecomputedNode>) -> Result<Vec<NodeId>> {
        self.ensure_not_finalized()?;
        if self.requires_scheduling || self.precomputed || !self.index.is_empty() {
            return Err(PlanError::AlreadyScheduled);
        }

        let ids: Vec<NodeId> = nodes
            .iter()
            .map(|n| self.arena.get_or_create(n.kind.clone()))
            .collect();

        for (position, node) in nodes.into_iter().enumerate() {
            let lookup = |positions: &[usize]| -> Result<Vec<NodeId>> {
                positions
                    .iter()
                    .map(|p| {
                        ids.get(*p).copied().ok_or_else(|| PlanError::ResolutionFailed {
                            node: node.kind.to_string(),
                            reason: format!("references precomputed node {p}, which does not exist"),
                        })
                    })
                    .collect()
            };
            let dependencies = lookup(&node.dependencies)?;
            let finalizers = lookup(&node.finalizers)?;

            let id = ids[position];
            for finalizer in &finalizers {
                self.finalizers.insert(*finalizer);
            }

            let target = self.arena.node_mut(id);
            target.apply_resolution(ResolvedNode {
                hard_successors: dependencies.clone(),
                dependency_successors: dependencies,
                finalizers,
                resource_locks: node.resource_locks,
            });
            target.require();
            if !target.dependencies_processed() {
                target.mark_dependencies_processed();
            }

            self.entry_nodes.insert(id);
            self.index.add(id, self.arena.node(id));
        }

        self.precomputed = true;
        self.requires_scheduling = true;
        info!(plan = %self.display_name, nodes = ids.len(), "seeded precomputed nodes");
        Ok(ids)
    }

    /// Expand the nodes in `queue` into the full graph of required nodes.
    fn discover_node_relationships(&mut self, mut queue: VecDeque<(NodeId, Link)>) -> Result<()> {
        let mut visiting: HashSet<NodeId> = HashSet::new();
        // Nodes whose dependencies are being walked, outermost first.
        let mut path: Vec<(NodeId, Link)> = Vec::new();

        while let Some(&(id, link)) = queue.front() {
            let node = self.arena.node(id);
            if node.dependencies_processed() || node.cannot_run_in_any_plan() {
                // Already visited, or already executed.
                queue.pop_front();
                continue;
            }

            if !self.satisfies_filter(node) {
                queue.pop_front();
                let node = self.arena.node_mut(id);
                node.mark_dependencies_processed();
                node.mark_filtered();
                self.filtered_nodes.insert(id);
                debug!(node = %node.kind(), "excluded by task filter");
                continue;
            }
            self.arena.node_mut(id).require();

            if visiting.insert(id) {
                // First visit: walk the dependencies before the node itself.
                path.push((id, link));
                let resolved = self.resolver.resolve(id, &mut self.arena).map_err(|e| {
                    PlanError::ResolutionFailed {
                        node: self.arena.describe(id),
                        reason: e.to_string(),
                    }
                })?;
                self.arena.node_mut(id).apply_resolution(resolved);

                let node = self.arena.node(id);
                let group = node.group();
                let hard = node.hard_successors().to_vec();
                let dependencies = node.dependency_successors().to_vec();

                for successor in hard {
                    self.arena.node_mut(successor).maybe_inherit_ordinal(group);
                }
                for successor in dependencies.into_iter().rev() {
                    if visiting.contains(&successor) {
                        self.check_back_edge(&path, id, successor)?;
                        continue;
                    }
                    queue.push_front((successor, Link::Dependency));
                }
            } else {
                // Second visit: every dependency has been walked.
                queue.pop_front();
                visiting.remove(&id);
                let popped = path.pop();
                debug_assert_eq!(popped.map(|(n, _)| n), Some(id));

                let node = self.arena.node_mut(id);
                node.mark_dependencies_processed();
                let finalizers = node.finalizers().to_vec();
                if self.index.add(id, self.arena.node(id)) {
                    debug!(node = %self.arena.describe(id), "added node to plan");
                }

                // Finalizers run immediately after the node.
                for finalizer in finalizers {
                    self.finalizers.insert(finalizer);
                    if !visiting.contains(&finalizer) {
                        queue.push_front((finalizer, Link::Finalizer));
                    }
                }
            }
        }

        Ok(())
    }

    /// `from` depends on `to`, which is still on the discovery path.
    ///
    /// That is a dependency cycle when every step from `to` down to `from` is
    /// a dependency. When a finalizer step is involved the nodes may still be
    /// orderable, and the ordering pass decides.
    fn check_back_edge(&self, path: &[(NodeId, Link)], from: NodeId, to: NodeId) -> Result<()> {
        let Some(start) = path.iter().position(|(n, _)| *n == to) else {
            return Ok(());
        };
        let all_dependencies = path[start + 1..]
            .iter()
            .all(|(_, link)| *link == Link::Dependency);
        if !all_dependencies {
            debug!(
                from = %self.arena.describe(from),
                to = %self.arena.describe(to),
                "back edge through a finalizer; leaving it to the ordering pass"
            );
            return Ok(());
        }

        let mut names: Vec<String> = path[start..]
            .iter()
            .map(|(n, _)| self.arena.describe(*n))
            .collect();
        names.push(self.arena.describe(to));
        warn!(cycle = %names.join(" -> "), "dependency cycle detected during discovery");
        Err(PlanError::DependencyCycle(names.join(" -> ")))
    }

    fn satisfies_filter(&self, node: &Node) -> bool {
        match node.kind() {
            NodeKind::LocalTask { task } => self.filter.is_satisfied_by(task),
            _ => true,
        }
    }

    /// Run the ordering pass if anything was submitted since the last run.
    pub fn determine_execution_plan(&mut self) -> Result<&Schedule> {
        if self.requires_scheduling {
            let schedule = determine_schedule(OrderingInputs {
                arena: &mut self.arena,
                index: &mut self.index,
                ordinals: &self.ordinals,
                entry_nodes: self.entry_nodes.as_slice(),
                finalizers: self.finalizers.as_slice(),
                filtered: self.filtered_nodes.as_slice(),
            })?;
            self.schedule = Some(schedule);
            self.requires_scheduling = false;
        }
        Ok(self.schedule.get_or_insert_with(Schedule::default))
    }

    /// The last computed schedule, if the ordering pass has run.
    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    /// Produce the immutable view handed to the runner.
    ///
    /// Repeated calls return the same plan. No further submissions are
    /// accepted afterwards.
    pub fn finalize_plan(&mut self) -> Result<FinalizedPlan> {
        if let Some(finalized) = &self.finalized {
            return Ok(finalized.clone());
        }

        let schedule = self.determine_execution_plan()?.clone();
        self.resolver.clear();

        let finalized = FinalizedPlan::new(
            self.display_name.clone(),
            schedule,
            FailurePolicy::from(self.continue_on_failure),
            self.completion_hooks.clone(),
            Arc::clone(&self.coordinator),
        );
        info!(plan = %self.display_name, size = self.size(), "execution plan finalized");
        self.finalized = Some(finalized.clone());
        Ok(finalized)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    /// Register a handler for completed local tasks.
    ///
    /// Handlers run in registration order; only handlers registered before
    /// [`Self::finalize_plan`] are seen by that finalized plan.
    pub fn on_complete(&mut self, handler: impl Fn(&CompletedNode) + Send + Sync + 'static) {
        self.completion_hooks.add(Arc::new(handler));
    }

    pub fn completion_handler_count(&self) -> usize {
        self.completion_hooks.len()
    }

    /// Node of a task in this plan.
    pub fn node(&self, task: &str) -> Result<NodeId> {
        self.index.get(task)
    }

    /// Local tasks in the plan, in discovery order.
    pub fn tasks(&self) -> Vec<TaskName> {
        self.index.tasks().cloned().collect()
    }

    /// Local tasks that were submitted as entry points.
    pub fn requested_tasks(&self) -> Vec<TaskName> {
        self.local_tasks_of(self.entry_nodes.as_slice())
    }

    /// Local tasks the filter excluded.
    pub fn filtered_tasks(&self) -> Vec<TaskName> {
        self.local_tasks_of(self.filtered_nodes.as_slice())
    }

    pub fn entry_nodes(&self) -> &[NodeId] {
        self.entry_nodes.as_slice()
    }

    pub fn filtered_nodes(&self) -> &[NodeId] {
        self.filtered_nodes.as_slice()
    }

    pub fn finalizer_nodes(&self) -> &[NodeId] {
        self.finalizers.as_slice()
    }

    fn local_tasks_of(&self, ids: &[NodeId]) -> Vec<TaskName> {
        ids.iter()
            .filter_map(|id| self.arena.node(*id).kind().local_task().cloned())
            .collect()
    }

    /// Number of public nodes in the plan.
    pub fn size(&self) -> usize {
        self.index.count_public()
    }

    /// Shrink the plan to its first `count` nodes.
    ///
    /// Removed nodes are reset so a later submission can discover them again.
    pub fn retain_first(&mut self, count: usize) -> Result<()> {
        self.ensure_not_finalized()?;
        let removed = self.index.retain_first(count);
        if removed.is_empty() {
            return Ok(());
        }
        for id in &removed {
            self.arena.node_mut(*id).reset();
        }
        self.requires_scheduling = true;
        debug!(kept = count, removed = removed.len(), "retained plan prefix");
        Ok(())
    }

    /// Reset the builder so it can be reused for another plan.
    ///
    /// Nodes keep their ids; every per-plan flag is cleared. Nodes that ran
    /// in the closed plan are marked as unable to run in any later plan.
    pub fn close(&mut self) {
        if let Some(finalized) = self.finalized.take() {
            for id in finalized.executed_nodes() {
                self.arena.node_mut(id).mark_cannot_run_in_any_plan();
            }
            finalized.close();
        }

        let ids: Vec<NodeId> = self
            .index
            .iter()
            .chain(self.filtered_nodes.as_slice().iter().copied())
            .chain(self.entry_nodes.as_slice().iter().copied())
            .chain(self.finalizers.as_slice().iter().copied())
            .collect();
        for id in ids {
            self.arena.node_mut(id).reset();
        }

        self.completion_hooks = CompletionHooks::new();
        self.entry_nodes.clear();
        self.index.clear();
        self.filtered_nodes.clear();
        self.finalizers.clear();
        self.ordinals.reset();
        self.resolver.clear();
        self.schedule = None;
        self.requires_scheduling = false;
        self.precomputed = false;
        self.next_ordinal = 0;

        debug!(plan = %self.display_name, "execution plan closed");
    }

    fn ensure_not_finalized(&self) -> Result<()> {
        if self.finalized.is_some() {
            return Err(PlanError::AlreadyFinalized);
        }
        Ok(())
    }
}
