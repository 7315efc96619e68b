//! Failover transform: promote surviving replicas when nodes fail.

use std::collections::HashSet;
use vbucket_map::{Chain, NodeId, VBucketMap};

/// Result of failing a set of nodes out of a map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverOutcome {
    pub map: VBucketMap,
    /// Vbuckets left with no live copy at all. The transform itself never
    /// fails on these; callers log the damage and carry on.
    pub lost: Vec<usize>,
}

impl FailoverOutcome {
    /// Share of vbuckets lost, as a percentage of the map.
    pub fn lost_percent(&self) -> f64 {
        if self.map.is_empty() {
            0.0
        } else {
            self.lost.len() as f64 * 100.0 / self.map.len() as f64
        }
    }
}

/// Removes every failed node from the map and promotes the first surviving
/// replica of each chain to master.
///
/// Failed slots become unassigned; leading unassigned slots then rotate to
/// the tail of the chain, so chain order among survivors is preserved.
/// After the transform no failed node appears anywhere in the map, and a
/// chain headed by an unassigned slot has lost all of its copies.
pub fn failover(map: &VBucketMap, failed: &HashSet<NodeId>) -> FailoverOutcome {
    let mut lost = Vec::new();
    let chains = map
        .chains()
        .enumerate()
        .map(|(vbucket, chain)| {
            let mut slots: Vec<Option<NodeId>> = chain
                .slots()
                .iter()
                .map(|slot| slot.clone().filter(|node| !failed.contains(node)))
                .collect();
            let leading_unassigned = slots.iter().take_while(|slot| slot.is_none()).count();
            slots.rotate_left(leading_unassigned);
            if slots.first().is_none_or(Option::is_none) {
                lost.push(vbucket);
            }
            Chain::new(slots)
        })
        .collect();
    FailoverOutcome {
        map: VBucketMap::from_chains(chains),
        lost,
    }
}
