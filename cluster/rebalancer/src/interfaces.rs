//! Traits for the external collaborators the driver consumes.
//!
//! The actual data movement, cluster membership and config replication are
//! all implemented elsewhere; the driver only needs these narrow surfaces.

use map_planner::Move;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use tokio::sync::watch;
use vbucket_map::NodeId;

/// Fractional per-node progress, `0.0..=1.0`.
pub type NodeProgress = HashMap<NodeId, f64>;

/// Callback the mover invokes with its per-node progress.
pub type ProgressFn<'a> = &'a (dyn Fn(NodeProgress) + Send + Sync);

/// Cluster membership control.
pub trait ClusterMembership: Send + Sync {
    /// Removes `nodes` from active cluster membership.
    fn deactivate(&self, nodes: &[NodeId]) -> impl Future<Output = ()> + Send;

    /// Makes `node` (the local node) leave the cluster.
    fn leave(&self, node: &NodeId) -> impl Future<Output = ()> + Send;

    fn actual_active_nodes(&self) -> Vec<NodeId>;
}

/// Per-node data engine control.
pub trait EngineControl: Send + Sync {
    /// Whether the engine on `node` is serving `bucket`.
    fn connected(&self, node: &NodeId, bucket: &str) -> impl Future<Output = bool> + Send;

    /// Stops inbound replication into `bucket` before its layout changes.
    fn disable_inbound_replication(&self, bucket: &str) -> impl Future<Output = ()> + Send;
}

/// How a mover run ended, when not successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoverError {
    /// The mover observed the stop signal and wound down cooperatively.
    Stopped,
    Failed(String),
}

impl fmt::Display for MoverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoverError::Stopped => f.write_str("mover stopped"),
            MoverError::Failed(reason) => write!(f, "mover failed: {reason}"),
        }
    }
}

impl std::error::Error for MoverError {}

/// The long-running worker that migrates vbucket data, one vbucket at a
/// time.
pub trait VBucketMover: Send + Sync {
    /// Performs `moves` against `bucket`, reporting fractional progress as
    /// it goes. The stop signal must be honored mid-run; a cooperative
    /// wind-down exits with [`MoverError::Stopped`].
    fn start(
        &self,
        bucket: &str,
        moves: Vec<Move>,
        progress: ProgressFn<'_>,
        stop: watch::Receiver<bool>,
    ) -> impl Future<Output = Result<(), MoverError>> + Send;
}

/// Idempotent post-move sanity pass over a bucket's runtime state.
pub trait Janitor: Send + Sync {
    fn cleanup(&self, bucket: &str) -> impl Future<Output = ()> + Send;
}

/// Replication of the cluster config to the other nodes.
pub trait ConfigReplication: Send + Sync {
    fn push(&self) -> impl Future<Output = ()> + Send;

    fn synchronize(&self) -> impl Future<Output = ()> + Send;
}

/// Where the driver reports cluster-wide rebalance progress.
pub trait ProgressSink: Send + Sync {
    fn update_progress(&self, progress: NodeProgress);
}
