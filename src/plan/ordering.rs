// src/plan/ordering.rs

//! Ordering pass: turns the discovered graph into a deterministic schedule.
//!
//! Constraints honoured by the produced order:
//! - a dependency runs before its dependents;
//! - nodes of a later submission batch follow the entry nodes of the
//!   earlier batches (through one synthetic marker per batch), unless an
//!   earlier batch needs them itself;
//! - a finalizer is placed right after the node it finalizes as soon as its
//!   own predecessors allow.
//!
//! Ties between otherwise unrelated nodes are broken by their position in
//! the [`NodeIndex`], i.e. by discovery order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use petgraph::Direction::{Incoming, Outgoing};
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, info};

use crate::errors::{PlanError, Result};
use crate::plan::index::NodeIndex;
use crate::plan::node::{NodeArena, NodeId, NodeKind};
use crate::plan::ordinal::OrdinalRegistry;

/// Why one scheduled node has to wait for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The predecessor must succeed.
    Dependency,
    /// The predecessor is finalized by this node; any outcome will do.
    Finalizes,
    /// Batch ordering; any outcome will do.
    Ordinal,
}

impl EdgeKind {
    fn strength(self) -> u8 {
        match self {
            EdgeKind::Dependency => 2,
            EdgeKind::Finalizes => 1,
            EdgeKind::Ordinal => 0,
        }
    }
}

/// One node of a [`Schedule`], with everything the runner needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub group: Option<u32>,
    pub predecessors: Vec<(NodeId, EdgeKind)>,
    /// Scheduled nodes this node finalizes.
    pub finalizes: Vec<NodeId>,
    pub resource_locks: Vec<String>,
    pub entry: bool,
    /// In the plan only because it finalizes other nodes.
    pub finalizer_only: bool,
    /// The work item was already executed elsewhere before this plan.
    pub executed: bool,
}

impl ScheduledNode {
    pub fn is_marker(&self) -> bool {
        matches!(self.kind, NodeKind::OrdinalMarker { .. })
    }
}

/// Result of the ordering pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    nodes: Vec<ScheduledNode>,
    filtered: Vec<NodeKind>,
    fingerprint: String,
}

impl Schedule {
    /// Scheduled nodes, markers included, in execution order.
    pub fn nodes(&self) -> &[ScheduledNode] {
        &self.nodes
    }

    /// Display names of the scheduled nodes without the synthetic markers.
    pub fn order(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| !n.is_marker())
            .map(|n| n.kind.to_string())
            .collect()
    }

    /// Position of `name` in [`Schedule::order`].
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.order().iter().position(|n| n == name)
    }

    /// Nodes the filter excluded; they are tracked but never run.
    pub fn filtered(&self) -> &[NodeKind] {
        &self.filtered
    }

    /// Hex digest of the order, identical for identical inputs.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Inputs of the ordering pass, borrowed from the plan builder.
pub struct OrderingInputs<'a> {
    pub arena: &'a mut NodeArena,
    pub index: &'a mut NodeIndex,
    pub ordinals: &'a OrdinalRegistry,
    pub entry_nodes: &'a [NodeId],
    pub finalizers: &'a [NodeId],
    pub filtered: &'a [NodeId],
}

/// Compute the schedule for the nodes currently in the index.
pub fn determine_schedule(inputs: OrderingInputs<'_>) -> Result<Schedule> {
    let OrderingInputs {
        arena,
        index,
        ordinals,
        entry_nodes,
        finalizers,
        filtered,
    } = inputs;

    let markers = add_ordinal_markers(arena, index, ordinals);
    let graph = build_graph(arena, index, ordinals, &markers);

    check_for_cycles(arena, index, &graph)?;

    let order = linearise(arena, index, &graph, &markers)?;

    let entries: HashSet<NodeId> = entry_nodes.iter().copied().collect();
    let finalizer_set: HashSet<NodeId> = finalizers.iter().copied().collect();

    let mut finalized_targets: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for target in index.iter() {
        for finalizer in arena.node(target).finalizers() {
            if index.contains(*finalizer) {
                finalized_targets.entry(*finalizer).or_default().push(target);
            }
        }
    }

    let mut nodes = Vec::with_capacity(order.len());
    let mut hasher = blake3::Hasher::new();

    for id in order {
        let node = arena.node(id);
        let predecessors: Vec<(NodeId, EdgeKind)> = graph
            .neighbors_directed(id, Incoming)
            .filter_map(|pred| graph.edge_weight(pred, id).map(|kind| (pred, *kind)))
            .collect();
        let finalizes = finalized_targets.remove(&id).unwrap_or_default();
        let depended_upon = graph
            .neighbors_directed(id, Outgoing)
            .any(|succ| graph.edge_weight(id, succ) == Some(&EdgeKind::Dependency));
        let entry = entries.contains(&id);

        hasher.update(node.kind().to_string().as_bytes());
        hasher.update(b"\n");

        nodes.push(ScheduledNode {
            id,
            kind: node.kind().clone(),
            group: node.group(),
            predecessors,
            finalizer_only: finalizer_set.contains(&id) && !entry && !depended_upon,
            finalizes,
            resource_locks: node.resource_locks().to_vec(),
            entry,
            executed: node.is_executed(),
        });
    }

    let schedule = Schedule {
        nodes,
        filtered: filtered.iter().map(|id| arena.node(*id).kind().clone()).collect(),
        fingerprint: hasher.finalize().to_hex().to_string(),
    };

    info!(
        scheduled = schedule.len(),
        filtered = schedule.filtered.len(),
        fingerprint = %schedule.fingerprint,
        "execution order determined"
    );
    Ok(schedule)
}

/// Create one marker per ordinal group after the first and add it to the index.
///
/// Returns `(marker, group ordinal, previous group ordinal)` triples.
fn add_ordinal_markers(
    arena: &mut NodeArena,
    index: &mut NodeIndex,
    ordinals: &OrdinalRegistry,
) -> Vec<(NodeId, u32, u32)> {
    let groups: Vec<u32> = ordinals.groups().map(|g| g.ordinal()).collect();
    let mut markers = Vec::new();

    for pair in groups.windows(2) {
        let (previous, current) = (pair[0], pair[1]);
        let marker = arena.get_or_create(NodeKind::OrdinalMarker { ordinal: current });
        let node = arena.node_mut(marker);
        node.require();
        node.maybe_inherit_ordinal(Some(current));
        if !node.dependencies_processed() {
            node.mark_dependencies_processed();
        }
        if index.add(marker, arena.node(marker)) {
            debug!(ordinal = current, "added ordinal marker");
        }
        markers.push((marker, current, previous));
    }

    markers
}

fn add_edge(graph: &mut DiGraphMap<NodeId, EdgeKind>, from: NodeId, to: NodeId, kind: EdgeKind) {
    match graph.edge_weight_mut(from, to) {
        Some(existing) if existing.strength() >= kind.strength() => {}
        Some(existing) => *existing = kind,
        None => {
            graph.add_edge(from, to, kind);
        }
    }
}

fn build_graph(
    arena: &NodeArena,
    index: &NodeIndex,
    ordinals: &OrdinalRegistry,
    markers: &[(NodeId, u32, u32)],
) -> DiGraphMap<NodeId, EdgeKind> {
    let mut graph: DiGraphMap<NodeId, EdgeKind> = DiGraphMap::new();

    for id in index.iter() {
        graph.add_node(id);
    }

    for id in index.iter() {
        let node = arena.node(id);
        // Edges to filtered or unrunnable nodes are dropped so they never
        // block their dependents.
        for dep in node.dependency_successors() {
            if index.contains(*dep) {
                add_edge(&mut graph, *dep, id, EdgeKind::Dependency);
            }
        }
        for finalizer in node.finalizers() {
            if index.contains(*finalizer) {
                add_edge(&mut graph, id, *finalizer, EdgeKind::Finalizes);
            }
        }
    }

    let effective = effective_groups(arena, index, &graph);

    let mut previous_marker: Option<NodeId> = None;
    for (marker, ordinal, previous) in markers {
        if let Some(group) = ordinals.get(*previous) {
            for entry in group.entry_nodes() {
                if index.contains(*entry) {
                    add_edge(&mut graph, *entry, *marker, EdgeKind::Ordinal);
                }
            }
        }
        if let Some(prev) = previous_marker {
            add_edge(&mut graph, prev, *marker, EdgeKind::Ordinal);
        }
        for id in index.iter() {
            let node = arena.node(id);
            if id == *marker
                || node.group() != Some(*ordinal)
                || matches!(node.kind(), NodeKind::OrdinalMarker { .. })
            {
                continue;
            }
            if effective.get(&id) == Some(ordinal) {
                add_edge(&mut graph, *marker, id, EdgeKind::Ordinal);
            } else {
                debug!(
                    node = %node.kind(),
                    ordinal,
                    "node is needed by an earlier batch; not held back by its marker"
                );
            }
        }
        previous_marker = Some(*marker);
    }

    graph
}

/// The earliest batch that needs each node.
///
/// A node's own group is lowered to the group of anything that has to wait
/// for it through dependency or finalizer edges, transitively. Nodes without
/// a group only get one if something downstream has one.
fn effective_groups(
    arena: &NodeArena,
    index: &NodeIndex,
    graph: &DiGraphMap<NodeId, EdgeKind>,
) -> HashMap<NodeId, u32> {
    let mut effective: HashMap<NodeId, u32> = HashMap::new();
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    for id in index.iter() {
        if let Some(group) = arena.node(id).group() {
            effective.insert(id, group);
            queue.push_back(id);
        }
    }

    // Groups only ever decrease, so this terminates even on a cyclic graph.
    while let Some(id) = queue.pop_front() {
        let Some(&group) = effective.get(&id) else {
            continue;
        };
        for pred in graph.neighbors_directed(id, Incoming) {
            if effective.get(&pred).is_none_or(|current| group < *current) {
                effective.insert(pred, group);
                queue.push_back(pred);
            }
        }
    }

    effective
}

fn check_for_cycles(
    arena: &NodeArena,
    index: &NodeIndex,
    graph: &DiGraphMap<NodeId, EdgeKind>,
) -> Result<()> {
    let positions: HashMap<NodeId, usize> = index.iter().enumerate().map(|(i, id)| (id, i)).collect();

    for mut component in tarjan_scc(graph) {
        let self_loop = component.len() == 1 && graph.contains_edge(component[0], component[0]);
        if component.len() > 1 || self_loop {
            component.sort_by_key(|id| positions.get(id).copied().unwrap_or(usize::MAX));
            let names: Vec<String> = component.iter().map(|id| arena.describe(*id)).collect();
            return Err(PlanError::DependencyCycle(format!(
                "nodes {} depend on each other through dependency or finalizer relationships",
                names.join(", ")
            )));
        }
    }
    Ok(())
}

fn linearise(
    arena: &NodeArena,
    index: &NodeIndex,
    graph: &DiGraphMap<NodeId, EdgeKind>,
    markers: &[(NodeId, u32, u32)],
) -> Result<Vec<NodeId>> {
    let ids: Vec<NodeId> = index.iter().collect();
    let positions: HashMap<NodeId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let marker_ids: HashSet<NodeId> = markers.iter().map(|(m, _, _)| *m).collect();

    let mut indegree: HashMap<NodeId, usize> = ids
        .iter()
        .map(|id| (*id, graph.neighbors_directed(*id, Incoming).count()))
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = ids
        .iter()
        .filter(|id| indegree[*id] == 0)
        .map(|id| Reverse(positions[id]))
        .collect();
    let mut urgent: VecDeque<NodeId> = VecDeque::new();
    let mut order = Vec::with_capacity(ids.len());

    loop {
        let next = match urgent.pop_front() {
            Some(id) => id,
            None => match ready.pop() {
                Some(Reverse(position)) => ids[position],
                None => break,
            },
        };
        order.push(next);

        let mut released: Vec<NodeId> = Vec::new();
        for succ in graph.neighbors_directed(next, Outgoing) {
            if let Some(count) = indegree.get_mut(&succ) {
                *count -= 1;
                if *count == 0 {
                    released.push(succ);
                }
            }
        }
        released.sort_by_key(|id| positions[id]);

        let finalizers_of_next = arena.node(next).finalizers();
        for succ in released {
            if marker_ids.contains(&succ) || finalizers_of_next.contains(&succ) {
                urgent.push_back(succ);
            } else {
                ready.push(Reverse(positions[&succ]));
            }
        }
    }

    if order.len() != ids.len() {
        return Err(PlanError::DependencyCycle(format!(
            "only {} of {} nodes could be ordered",
            order.len(),
            ids.len()
        )));
    }
    Ok(order)
}
