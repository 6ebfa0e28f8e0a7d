// src/coordination.rs

//! Shared state lock and named resource locks.
//!
//! Everything that reads or changes execution state of a finalized plan does
//! so inside [`LockCoordinator::with_state_lock`], so observers taking a
//! snapshot never see a half-applied transition.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::trace;

use crate::plan::NodeId;

/// Named exclusive locks (e.g. an output directory) and their holders.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    held: HashMap<String, NodeId>,
}

impl ResourceLocks {
    /// Acquire every lock in `names` for `owner`, or none of them.
    pub fn try_acquire_all(&mut self, owner: NodeId, names: &[String]) -> bool {
        if names
            .iter()
            .any(|name| self.held.get(name).is_some_and(|holder| *holder != owner))
        {
            return false;
        }
        for name in names {
            self.held.insert(name.clone(), owner);
        }
        trace!(%owner, ?names, "acquired resource locks");
        true
    }

    /// Release the locks in `names` that `owner` holds.
    pub fn release_all(&mut self, owner: NodeId, names: &[String]) {
        for name in names {
            if self.held.get(name) == Some(&owner) {
                self.held.remove(name);
            }
        }
    }

    pub fn holder(&self, name: &str) -> Option<NodeId> {
        self.held.get(name).copied()
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

/// Coordination service shared by the plan, the runner and observers.
#[derive(Debug, Default)]
pub struct LockCoordinator {
    state: Mutex<ResourceLocks>,
}

impl LockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` while holding the state lock.
    ///
    /// The lock is released on every exit path, including a panic inside
    /// `action`; a poisoned lock is recovered rather than propagated.
    pub fn with_state_lock<R>(&self, action: impl FnOnce(&mut ResourceLocks) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        action(&mut guard)
    }
}
