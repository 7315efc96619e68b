use bucket_config::BucketError;
use std::fmt;
use vbucket_map::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceError {
    /// Cooperative cancellation. Where a map had been touched, fixup has
    /// already run by the time this surfaces.
    Stopped,
    /// Engines never picked up the bucket within the polling budget. Fatal;
    /// no data had moved for the bucket, so no fixup is involved.
    WaitForEngineFailed { bucket: String, nodes: Vec<NodeId> },
    /// The bucket vanished under us (raced deletion).
    BucketNotFound(String),
    /// The mover exited with a real failure; fixup has already run.
    MoverFailed { bucket: String, reason: String },
    Config(BucketError),
}

impl fmt::Display for RebalanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebalanceError::Stopped => f.write_str("rebalance stopped"),
            RebalanceError::WaitForEngineFailed { bucket, nodes } => {
                let nodes: Vec<&str> = nodes.iter().map(NodeId::as_str).collect();
                write!(
                    f,
                    "timed out waiting for engines {nodes:?} to pick up bucket {bucket}"
                )
            }
            RebalanceError::BucketNotFound(name) => {
                write!(f, "bucket {name} disappeared during rebalance")
            }
            RebalanceError::MoverFailed { bucket, reason } => {
                write!(f, "vbucket mover failed on bucket {bucket}: {reason}")
            }
            RebalanceError::Config(err) => write!(f, "config update failed: {err}"),
        }
    }
}

impl std::error::Error for RebalanceError {}

impl From<BucketError> for RebalanceError {
    fn from(err: BucketError) -> Self {
        match err {
            BucketError::NotFound(name) => RebalanceError::BucketNotFound(name),
            other => RebalanceError::Config(other),
        }
    }
}
