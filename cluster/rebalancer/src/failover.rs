//! Failover orchestration: apply the map transform across every bucket and
//! strip failed nodes from server lists.

use bucket_config::{BucketError, BucketFacade, ConfigStore};
use map_planner::failover;
use std::collections::HashSet;
use tracing::{info, warn};
use vbucket_map::NodeId;

/// Fails `failed` out of every bucket.
///
/// Membase buckets get the replica-promotion transform applied to their
/// map; both bucket types lose the failed nodes from their server lists.
/// Vbuckets left with no live copy are not an error — the damage is logged
/// and the failover completes, since a partial cluster beats none. Buckets
/// deleted mid-flight are skipped.
pub fn failover_buckets<S: ConfigStore>(
    buckets: &BucketFacade<S>,
    failed: &HashSet<NodeId>,
) -> Result<(), BucketError> {
    for (name, config) in buckets.get_buckets() {
        let survivors: Vec<NodeId> = config
            .servers
            .iter()
            .filter(|node| !failed.contains(*node))
            .cloned()
            .collect();

        if config.is_membase()
            && let Some(map) = &config.map
        {
            let outcome = failover(map, failed);
            if outcome.lost.is_empty() {
                info!(bucket = name.as_str(), "Failed over with no data loss");
            } else {
                warn!(
                    bucket = name.as_str(),
                    lost = outcome.lost.len(),
                    lost_percent = outcome.lost_percent(),
                    "Failover lost all copies of some vbuckets"
                );
            }
            match buckets.set_map(&name, outcome.map) {
                Err(BucketError::NotFound(_)) => continue,
                other => other?,
            }
        }

        match buckets.set_servers(&name, survivors) {
            Err(BucketError::NotFound(_)) => continue,
            other => other?,
        }
    }
    Ok(())
}
