//! Safety classification: how well a bucket's layout would survive another
//! failure.

use serde::Serialize;
use std::collections::HashSet;
use strum::Display;
use vbucket_map::{NodeId, VBucketMap};

/// Gap beyond which a turn's vbucket distribution counts as unbalanced.
pub const UNBALANCE_GAP: usize = 2;

/// Per-bucket safety verdict, in increasing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Serialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum BucketSafety {
    Ok,
    SoftRebalanceNeeded,
    RebalanceNeeded,
    FailoverNeeded,
    HardNodesNeeded,
}

/// Cluster-level warning, as surfaced to the admin interface.
///
/// The first four mirror the non-ok [`BucketSafety`] severities; the last is
/// the separate headroom axis raised when a bucket has no spare live nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SafetyWarning {
    SoftRebalanceNeeded,
    RebalanceNeeded,
    FailoverNeeded,
    HardNodesNeeded,
    SoftNodesNeeded,
}

impl BucketSafety {
    /// The warning this severity surfaces as, if any.
    pub fn warning(self) -> Option<SafetyWarning> {
        match self {
            BucketSafety::Ok => None,
            BucketSafety::SoftRebalanceNeeded => Some(SafetyWarning::SoftRebalanceNeeded),
            BucketSafety::RebalanceNeeded => Some(SafetyWarning::RebalanceNeeded),
            BucketSafety::FailoverNeeded => Some(SafetyWarning::FailoverNeeded),
            BucketSafety::HardNodesNeeded => Some(SafetyWarning::HardNodesNeeded),
        }
    }
}

/// True when some turn's vbucket counts over `servers` differ by more than
/// [`UNBALANCE_GAP`] between the heaviest and lightest node.
pub fn unbalanced(map: &VBucketMap, servers: &[NodeId]) -> bool {
    unbalanced_with_gap(map, servers, UNBALANCE_GAP)
}

pub fn unbalanced_with_gap(map: &VBucketMap, servers: &[NodeId], gap: usize) -> bool {
    map.histograms(servers)
        .iter()
        .any(|histogram| histogram.spread() > gap)
}

/// Classifies one replicated bucket against the live node set.
///
/// A bucket with no replicas has nothing to protect. Otherwise the verdict
/// hinges on the weakest chain: once some vbucket is down to a single live
/// copy the cluster must act (fail the dead servers over, rebalance, or add
/// hardware), and a merely skewed layout earns a soft nudge.
pub fn bucket_safety(
    num_replicas: usize,
    map: Option<&VBucketMap>,
    servers: &[NodeId],
    live: &HashSet<NodeId>,
) -> BucketSafety {
    if num_replicas == 0 {
        return BucketSafety::Ok;
    }
    let Some(map) = map else {
        return if live.len() >= 2 {
            BucketSafety::Ok
        } else {
            BucketSafety::HardNodesNeeded
        };
    };
    let min_live_copies = map.min_live_copies(live).unwrap_or(0);
    if min_live_copies <= 1 {
        if live.is_empty() {
            BucketSafety::HardNodesNeeded
        } else if servers.iter().any(|node| !live.contains(node)) {
            BucketSafety::FailoverNeeded
        } else if live.len() > 1 {
            BucketSafety::RebalanceNeeded
        } else {
            BucketSafety::HardNodesNeeded
        }
    } else if unbalanced(map, servers) {
        BucketSafety::SoftRebalanceNeeded
    } else {
        BucketSafety::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{map, n};
    use maplit::hashset;

    #[test]
    fn unbalanced_detects_a_wide_spread() {
        let wide = map(&[
            &[Some("a")],
            &[Some("a")],
            &[Some("a")],
            &[Some("a")],
            &[Some("b")],
        ]);
        let servers = [n("a"), n("b")];
        assert!(unbalanced(&wide, &servers));

        let close = map(&[
            &[Some("a")],
            &[Some("a")],
            &[Some("a")],
            &[Some("b")],
            &[Some("b")],
        ]);
        assert!(!unbalanced(&close, &servers));
    }

    #[test]
    fn healthy_replicated_bucket_is_ok() {
        let m = map(&[&[Some("a"), Some("b")], &[Some("b"), Some("a")]]);
        let servers = [n("a"), n("b")];
        let live = hashset! { n("a"), n("b") };
        assert_eq!(bucket_safety(1, Some(&m), &servers, &live), BucketSafety::Ok);
    }

    #[test]
    fn dead_server_with_thin_chains_needs_failover() {
        let m = map(&[&[Some("a"), Some("b")], &[Some("b"), Some("a")]]);
        let servers = [n("a"), n("b")];
        let live = hashset! { n("a") };
        assert_eq!(
            bucket_safety(1, Some(&m), &servers, &live),
            BucketSafety::FailoverNeeded
        );
    }

    #[test]
    fn no_live_nodes_needs_hardware() {
        let m = map(&[&[Some("a"), Some("b")], &[Some("b"), Some("a")]]);
        let servers = [n("a"), n("b")];
        assert_eq!(
            bucket_safety(1, Some(&m), &servers, &hashset! {}),
            BucketSafety::HardNodesNeeded
        );
    }

    #[test]
    fn thin_chains_with_all_servers_live_need_rebalance() {
        let m = map(&[&[Some("a"), None], &[Some("b"), Some("a")]]);
        let servers = [n("a"), n("b")];
        let live = hashset! { n("a"), n("b") };
        assert_eq!(
            bucket_safety(1, Some(&m), &servers, &live),
            BucketSafety::RebalanceNeeded
        );
    }

    #[test]
    fn single_live_node_needs_hardware() {
        let m = map(&[&[Some("a"), None]]);
        let servers = [n("a")];
        let live = hashset! { n("a") };
        assert_eq!(
            bucket_safety(1, Some(&m), &servers, &live),
            BucketSafety::HardNodesNeeded
        );
    }

    #[test]
    fn missing_map_is_ok_with_two_live_nodes() {
        let servers = [n("a"), n("b")];
        assert_eq!(
            bucket_safety(1, None, &servers, &hashset! { n("a"), n("b") }),
            BucketSafety::Ok
        );
        assert_eq!(
            bucket_safety(1, None, &servers, &hashset! { n("a") }),
            BucketSafety::HardNodesNeeded
        );
    }

    #[test]
    fn zero_replicas_is_always_ok() {
        assert_eq!(bucket_safety(0, None, &[], &hashset! {}), BucketSafety::Ok);
    }

    #[test]
    fn skewed_but_safe_layout_gets_a_soft_nudge() {
        let m = map(&[
            &[Some("a"), Some("b")],
            &[Some("a"), Some("b")],
            &[Some("a"), Some("b")],
            &[Some("a"), Some("b")],
            &[Some("b"), Some("a")],
        ]);
        let servers = [n("a"), n("b")];
        let live = hashset! { n("a"), n("b") };
        assert_eq!(
            bucket_safety(1, Some(&m), &servers, &live),
            BucketSafety::SoftRebalanceNeeded
        );
    }

    #[test]
    fn losing_a_node_never_lowers_severity() {
        let m = map(&[&[Some("a"), Some("b")], &[Some("b"), Some("a")]]);
        let servers = [n("a"), n("b")];
        let full = bucket_safety(1, Some(&m), &servers, &hashset! { n("a"), n("b") });
        let partial = bucket_safety(1, Some(&m), &servers, &hashset! { n("a") });
        let none = bucket_safety(1, Some(&m), &servers, &hashset! {});
        assert!(full <= partial && partial <= none);
    }
}
