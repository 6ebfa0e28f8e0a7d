// src/plan/mod.rs

//! Execution plan: node discovery, ordering and the finalized view.
//!
//! - `node`: node arena and per-node state.
//! - `resolver`: seam that reports a node's direct relationships.
//! - `builder`: [`ExecutionPlan`], which discovers the graph for each
//!   submitted batch of entry points.
//! - `ordering`: turns the discovered graph into a [`Schedule`].
//! - `finalized`: [`FinalizedPlan`], the shared view the runner drains.

pub mod builder;
pub mod completion;
pub mod filter;
pub mod finalized;
pub mod index;
pub mod node;
pub mod ordering;
pub mod ordinal;
pub mod resolver;

pub use builder::{ExecutionPlan, PrecomputedNode};
pub use completion::{CompletedNode, CompletionHooks};
pub use filter::{ExcludeTasks, SatisfyAll, TaskFilter};
pub use finalized::{ExecutionSummary, FinalizedPlan, NodeState, ScheduledNodes, Selection};
pub use index::NodeIndex;
pub use node::{Node, NodeArena, NodeId, NodeKind};
pub use ordering::{EdgeKind, Schedule, ScheduledNode};
pub use ordinal::{OrdinalGroup, OrdinalRegistry};
pub use resolver::{BuildFileResolver, DependencyResolver, ResolvedNode};
