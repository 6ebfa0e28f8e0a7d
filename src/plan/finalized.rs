// src/plan/finalized.rs

//! Immutable view of a plan handed to the runner.
//!
//! The schedule itself never changes after finalization. What does change is
//! the execution state of each node; every read and write of it happens
//! inside [`LockCoordinator::with_state_lock`], so selecting work, acquiring
//! resource locks and recording completions are atomic with respect to each
//! other. Completion handlers are always called after the lock is released.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::coordination::{LockCoordinator, ResourceLocks};
use crate::errors::{PlanError, Result};
use crate::plan::completion::{CompletedNode, CompletionHooks};
use crate::plan::node::{NodeId, NodeKind};
use crate::plan::ordering::{EdgeKind, Schedule, ScheduledNode};
use crate::types::{FailurePolicy, TaskOutcome};

/// Execution state of a scheduled node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Waiting,
    Running,
    Succeeded,
    /// Executed and failed with the given exit code.
    Failed(i32),
    /// Not executed because a dependency failed or there was nothing to finalize.
    Skipped,
    /// Not executed because the plan stopped early.
    NotRun,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, NodeState::Waiting | NodeState::Running)
    }

    /// The node's work was actually performed.
    pub fn executed(self) -> bool {
        matches!(self, NodeState::Succeeded | NodeState::Failed(_))
    }
}

/// What the runner should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// This node is now running; report back through [`FinalizedPlan::finish_node`].
    Ready(ScheduledNode),
    /// Nothing can start until a running node finishes.
    Waiting,
    /// Every node has reached a terminal state.
    Finished,
}

/// Final state of every public node, in schedule order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    results: Vec<(String, NodeState)>,
}

impl ExecutionSummary {
    pub fn results(&self) -> &[(String, NodeState)] {
        &self.results
    }

    pub fn state_of(&self, name: &str) -> Option<NodeState> {
        self.results.iter().find(|(n, _)| n == name).map(|(_, s)| *s)
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.names_where(|s| s == NodeState::Succeeded)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.names_where(|s| matches!(s, NodeState::Failed(_)))
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.names_where(|s| matches!(s, NodeState::Skipped | NodeState::NotRun))
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|(_, s)| *s == NodeState::Succeeded)
    }

    fn names_where(&self, pred: impl Fn(NodeState) -> bool) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, s)| pred(*s))
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

#[derive(Debug)]
struct ExecutionState {
    states: Vec<NodeState>,
    /// Waiting nodes whose predecessors allow them to start.
    ready: BTreeSet<usize>,
    /// Nodes not yet in a terminal state.
    pending: usize,
    /// Finalizers released by a completion; offered before anything else.
    preferred: VecDeque<usize>,
    /// A failure stopped new work (stop-on-failure).
    aborted: bool,
    closed: bool,
}

impl ExecutionState {
    fn set(&mut self, position: usize, new: NodeState) {
        let old = self.states[position];
        if !old.is_terminal() && new.is_terminal() {
            self.pending -= 1;
        }
        self.states[position] = new;
        if new != NodeState::Waiting {
            self.ready.remove(&position);
        }
    }
}

#[derive(Debug)]
struct Inner {
    display_name: String,
    schedule: Schedule,
    positions: HashMap<NodeId, usize>,
    /// For each scheduled node, the positions of the nodes that finalize it.
    finalized_by: Vec<Vec<usize>>,
    /// For each scheduled node, the positions of the nodes waiting on it.
    dependents: Vec<Vec<usize>>,
    policy: FailurePolicy,
    hooks: CompletionHooks,
    coordinator: Arc<LockCoordinator>,
    state: Mutex<ExecutionState>,
}

/// Shared handle to a finalized plan. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FinalizedPlan {
    inner: Arc<Inner>,
}

impl FinalizedPlan {
    pub(crate) fn new(
        display_name: String,
        schedule: Schedule,
        policy: FailurePolicy,
        hooks: CompletionHooks,
        coordinator: Arc<LockCoordinator>,
    ) -> Self {
        let positions: HashMap<NodeId, usize> = schedule
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id, i))
            .collect();

        let mut finalized_by = vec![Vec::new(); schedule.len()];
        let mut dependents = vec![Vec::new(); schedule.len()];
        for (position, node) in schedule.nodes().iter().enumerate() {
            for target in &node.finalizes {
                if let Some(t) = positions.get(target) {
                    finalized_by[*t].push(position);
                }
            }
            for (pred, _) in &node.predecessors {
                if let Some(p) = positions.get(pred) {
                    dependents[*p].push(position);
                }
            }
        }

        let state = ExecutionState {
            states: vec![NodeState::Waiting; schedule.len()],
            ready: BTreeSet::new(),
            pending: schedule.len(),
            preferred: VecDeque::new(),
            aborted: false,
            closed: false,
        };
        let len = schedule.len();

        let plan = Self {
            inner: Arc::new(Inner {
                display_name,
                schedule,
                positions,
                finalized_by,
                dependents,
                policy,
                hooks,
                coordinator,
                state: Mutex::new(state),
            }),
        };
        {
            let mut state = plan.lock_state();
            plan.propagate(&mut state, 0..len);
        }
        plan
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    pub fn schedule(&self) -> &Schedule {
        &self.inner.schedule
    }

    pub fn policy(&self) -> FailurePolicy {
        self.inner.policy
    }

    /// Number of public nodes.
    pub fn size(&self) -> usize {
        self.inner
            .schedule
            .nodes()
            .iter()
            .filter(|n| n.kind.is_public())
            .count()
    }

    fn lock_state(&self) -> MutexGuard<'_, ExecutionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick the next node to run and mark it running.
    ///
    /// A node is ready once every dependency succeeded and every finalized or
    /// earlier-batch predecessor reached a terminal state, and all of its
    /// resource locks are free.
    pub fn select_next(&self) -> Selection {
        self.inner.coordinator.with_state_lock(|locks| {
            let mut state = self.lock_state();
            if state.pending == 0 {
                return Selection::Finished;
            }

            while let Some(position) = state.preferred.pop_front() {
                if self.try_start(&mut state, locks, position) {
                    return Selection::Ready(self.inner.schedule.nodes()[position].clone());
                }
            }

            let candidates: Vec<usize> = state.ready.iter().copied().collect();
            for position in candidates {
                if self.try_start(&mut state, locks, position) {
                    return Selection::Ready(self.inner.schedule.nodes()[position].clone());
                }
            }

            Selection::Waiting
        })
    }

    fn try_start(&self, state: &mut ExecutionState, locks: &mut ResourceLocks, position: usize) -> bool {
        if state.states[position] != NodeState::Waiting || !self.is_ready(state, position) {
            return false;
        }
        let node = &self.inner.schedule.nodes()[position];
        if !locks.try_acquire_all(node.id, &node.resource_locks) {
            debug!(node = %node.kind, "waiting for resource locks");
            return false;
        }
        state.set(position, NodeState::Running);
        debug!(node = %node.kind, "node selected for execution");
        true
    }

    fn is_ready(&self, state: &ExecutionState, position: usize) -> bool {
        let node = &self.inner.schedule.nodes()[position];
        node.predecessors.iter().all(|(pred, kind)| {
            let Some(p) = self.inner.positions.get(pred) else {
                return true;
            };
            match kind {
                EdgeKind::Dependency => state.states[*p] == NodeState::Succeeded,
                EdgeKind::Finalizes | EdgeKind::Ordinal => state.states[*p].is_terminal(),
            }
        })
    }

    /// Re-examine the waiting nodes in `positions` and, transitively, the
    /// nodes waiting on any of them that changed state.
    ///
    /// A node is either resolved without executing (markers, skips after
    /// failures, finalizers with nothing to finalize, work executed before
    /// this plan) or, once its predecessors allow it, recorded as ready.
    fn propagate(&self, state: &mut ExecutionState, positions: impl IntoIterator<Item = usize>) {
        let nodes = self.inner.schedule.nodes();
        let mut queue: VecDeque<usize> = positions.into_iter().collect();
        while let Some(position) = queue.pop_front() {
            if state.states[position] != NodeState::Waiting {
                continue;
            }
            let node = &nodes[position];
            if let Some(resolved) = self.settled_state(state, position, node) {
                debug!(node = %node.kind, state = ?resolved, "node settled without executing");
                state.set(position, resolved);
                queue.extend(self.inner.dependents[position].iter().copied());
            } else if self.is_ready(state, position) {
                state.ready.insert(position);
            }
        }
    }

    fn settled_state(&self, state: &ExecutionState, position: usize, node: &ScheduledNode) -> Option<NodeState> {
        let pred_state = |pred: &NodeId| {
            self.inner
                .positions
                .get(pred)
                .map(|p| state.states[*p])
                .unwrap_or(NodeState::Succeeded)
        };

        if state.aborted && !self.finalizes_executed_node(state, position) {
            return Some(NodeState::NotRun);
        }

        for (pred, kind) in &node.predecessors {
            if *kind != EdgeKind::Dependency {
                continue;
            }
            match pred_state(pred) {
                NodeState::Failed(_) | NodeState::Skipped => return Some(NodeState::Skipped),
                NodeState::NotRun => return Some(NodeState::NotRun),
                _ => {}
            }
        }

        if node.finalizer_only && !node.finalizes.is_empty() {
            let targets = &node.finalizes;
            let all_done = targets.iter().all(|t| pred_state(t).is_terminal());
            let any_executed = targets.iter().any(|t| pred_state(t).executed());
            if all_done && !any_executed {
                return Some(NodeState::Skipped);
            }
        }

        if (node.is_marker() || node.executed) && self.is_ready(state, position) {
            return Some(NodeState::Succeeded);
        }

        None
    }

    fn finalizes_executed_node(&self, state: &ExecutionState, position: usize) -> bool {
        self.inner.schedule.nodes()[position]
            .finalizes
            .iter()
            .filter_map(|t| self.inner.positions.get(t))
            .any(|t| matches!(state.states[*t], NodeState::Succeeded | NodeState::Failed(_) | NodeState::Running))
    }

    /// Record the outcome of a node returned by [`Self::select_next`].
    ///
    /// Completion handlers run after the state lock has been released.
    pub fn finish_node(&self, id: NodeId, outcome: TaskOutcome) -> Result<()> {
        let position = *self
            .inner
            .positions
            .get(&id)
            .ok_or_else(|| PlanError::TaskNotFound(id.to_string()))?;
        let node = &self.inner.schedule.nodes()[position];

        let completed = self.inner.coordinator.with_state_lock(|locks| {
            let mut state = self.lock_state();
            if state.states[position] != NodeState::Running {
                warn!(node = %node.kind, state = ?state.states[position], "finish reported for a node that is not running");
                return None;
            }
            locks.release_all(id, &node.resource_locks);

            state.set(
                position,
                match outcome {
                    TaskOutcome::Success => NodeState::Succeeded,
                    TaskOutcome::Failed(code) => NodeState::Failed(code),
                },
            );

            let mut newly_aborted = false;
            if !outcome.is_success() {
                match self.inner.policy {
                    FailurePolicy::StopOnFailure => {
                        if !state.aborted {
                            warn!(node = %node.kind, "node failed; no new work will be started");
                            newly_aborted = true;
                        }
                        state.aborted = true;
                    }
                    FailurePolicy::ContinueOnFailure => {
                        warn!(node = %node.kind, "node failed; continuing with unaffected work");
                    }
                }
            }

            if newly_aborted {
                // Every waiting node may now be abandoned.
                self.propagate(&mut state, 0..self.inner.schedule.len());
            } else {
                self.propagate(&mut state, self.inner.dependents[position].iter().copied());
            }
            state
                .preferred
                .extend(self.inner.finalized_by[position].iter().copied());

            node.kind.local_task().map(|task| CompletedNode {
                id,
                task: task.clone(),
                outcome,
            })
        });

        if let Some(completed) = completed {
            self.inner.hooks.notify(&completed);
        }
        Ok(())
    }

    pub fn node_state(&self, id: NodeId) -> Option<NodeState> {
        let position = *self.inner.positions.get(&id)?;
        Some(self.lock_state().states[position])
    }

    pub fn is_finished(&self) -> bool {
        self.inner
            .coordinator
            .with_state_lock(|_| self.lock_state().pending == 0)
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Local task nodes whose work was performed by this plan.
    pub fn executed_nodes(&self) -> Vec<NodeId> {
        let state = self.lock_state();
        self.inner
            .schedule
            .nodes()
            .iter()
            .zip(&state.states)
            .filter(|(node, s)| s.executed() && node.kind.local_task().is_some())
            .map(|(node, _)| node.id)
            .collect()
    }

    pub fn summary(&self) -> ExecutionSummary {
        let state = self.lock_state();
        ExecutionSummary {
            results: self
                .inner
                .schedule
                .nodes()
                .iter()
                .zip(&state.states)
                .filter(|(node, _)| node.kind.is_public())
                .map(|(node, s)| (node.kind.to_string(), *s))
                .collect(),
        }
    }

    /// Stop the plan: waiting nodes become [`NodeState::NotRun`].
    ///
    /// Running nodes are left to finish.
    pub fn close(&self) {
        self.inner.coordinator.with_state_lock(|_| {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.aborted = true;
            for position in 0..state.states.len() {
                if state.states[position] == NodeState::Waiting {
                    state.set(position, NodeState::NotRun);
                }
            }
            info!(plan = %self.inner.display_name, "finalized plan closed");
        });
    }

    /// Snapshot access to the scheduled nodes, for progress reporting.
    pub fn scheduled_nodes(&self) -> ScheduledNodes {
        ScheduledNodes { plan: self.clone() }
    }
}

/// Deferred, consistent view of a finalized plan's scheduled nodes.
#[derive(Debug, Clone)]
pub struct ScheduledNodes {
    plan: FinalizedPlan,
}

impl ScheduledNodes {
    /// Call `visitor` with a copy of the scheduled nodes taken under the
    /// state lock. Markers, and nodes of other builds that have already
    /// completed, are left out.
    ///
    /// The visitor runs while the lock is held; it must not call back into
    /// the plan.
    pub fn visit<T>(&self, visitor: impl FnOnce(&[ScheduledNode]) -> T) -> T {
        let inner = &self.plan.inner;
        inner.coordinator.with_state_lock(|_| {
            let state = self.plan.lock_state();
            let snapshot: Vec<ScheduledNode> = inner
                .schedule
                .nodes()
                .iter()
                .zip(&state.states)
                .filter(|(node, s)| match &node.kind {
                    NodeKind::OrdinalMarker { .. } => false,
                    NodeKind::TaskInAnotherBuild { .. } => !(node.executed || s.is_terminal()),
                    NodeKind::LocalTask { .. } => true,
                })
                .map(|(node, _)| node.clone())
                .collect();
            visitor(&snapshot)
        })
    }
}
