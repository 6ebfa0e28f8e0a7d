// src/plan/ordinal.rs

//! Submission batches ("ordinal groups").
//!
//! Every call that submits entry points gets an ordinal. Work from a later
//! batch is ordered after the entry nodes of the earlier batch through one
//! shared marker per group instead of edges between every pair of nodes;
//! see `ordering.rs` for how the markers are wired.

use std::collections::BTreeMap;

use tracing::debug;

use crate::plan::node::NodeId;

/// One submission batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrdinalGroup {
    ordinal: u32,
    entry_nodes: Vec<NodeId>,
}

impl OrdinalGroup {
    fn new(ordinal: u32) -> Self {
        Self {
            ordinal,
            entry_nodes: Vec::new(),
        }
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Entry nodes in submission order.
    pub fn entry_nodes(&self) -> &[NodeId] {
        &self.entry_nodes
    }

    /// Returns `false` if the node was already an entry node of this group.
    pub fn add_entry_node(&mut self, node: NodeId) -> bool {
        if self.entry_nodes.contains(&node) {
            return false;
        }
        self.entry_nodes.push(node);
        true
    }
}

/// All ordinal groups of the current plan, keyed by ordinal.
#[derive(Debug, Default)]
pub struct OrdinalRegistry {
    groups: BTreeMap<u32, OrdinalGroup>,
}

impl OrdinalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing group for `ordinal`, or a fresh one.
    pub fn group(&mut self, ordinal: u32) -> &mut OrdinalGroup {
        self.groups.entry(ordinal).or_insert_with(|| {
            debug!(ordinal, "creating ordinal group");
            OrdinalGroup::new(ordinal)
        })
    }

    pub fn get(&self, ordinal: u32) -> Option<&OrdinalGroup> {
        self.groups.get(&ordinal)
    }

    /// Groups in ascending ordinal order.
    pub fn groups(&self) -> impl Iterator<Item = &OrdinalGroup> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn reset(&mut self) {
        self.groups.clear();
    }
}
