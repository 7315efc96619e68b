//! Cluster-wide safety aggregation over all buckets.

use bucket_config::BucketList;
use map_planner::{bucket_safety, BucketSafety, SafetyWarning};
use std::collections::HashSet;
use vbucket_map::NodeId;

/// Classifies how safe the whole cluster is against further failures.
///
/// The base warning is the worst per-bucket severity across membase
/// buckets. On top of that, `softNodesNeeded` is raised when some bucket
/// has no spare live nodes (`|live| ≤ num_replicas`) and is not already
/// past saving. The result lists whichever of the two are not ok.
pub fn failover_warnings(buckets: &BucketList, live: &HashSet<NodeId>) -> Vec<SafetyWarning> {
    let mut base = BucketSafety::Ok;
    let mut soft_nodes = false;
    for (_, config) in buckets {
        if !config.is_membase() {
            continue;
        }
        let safety = bucket_safety(
            config.num_replicas,
            config.map.as_ref(),
            &config.servers,
            live,
        );
        base = base.max(safety);
        if live.len() <= config.num_replicas && safety != BucketSafety::HardNodesNeeded {
            soft_nodes = true;
        }
    }

    let mut warnings = Vec::new();
    if let Some(warning) = base.warning() {
        warnings.push(warning);
    }
    if soft_nodes {
        warnings.push(SafetyWarning::SoftNodesNeeded);
    }
    warnings
}
