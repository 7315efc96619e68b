//! Layout planning over vbucket maps: balancing, replica repair, failover
//! and safety classification.
//!
//! Everything here is pure. The rebalance driver owns the side effects
//! (data movement, config commits); this crate only decides what the next
//! map should look like and how safe the current one is.

use vbucket_map::NodeId;

pub mod balance;
pub mod failover;
pub mod repair;
pub mod safety;

pub use balance::{balance_nodes, balance_nodes_with_gap, master_moves, BALANCE_GAP};
pub use failover::{failover, FailoverOutcome};
pub use repair::new_replicas;
pub use safety::{bucket_safety, unbalanced, BucketSafety, SafetyWarning, UNBALANCE_GAP};

/// A single-slot reassignment for one vbucket.
///
/// The turn the move applies to travels alongside: master-move planning is
/// always turn 0, balancer output is tagged by the turn it was computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub vbucket: usize,
    pub old: Option<NodeId>,
    pub new: NodeId,
}
