//! The rebalance driver: orchestrates planning, data movement and config
//! commits for a whole-cluster rebalance, plus the failover and safety
//! entry points the orchestrator calls.
//!
//! Planning itself lives in `map_planner` and is pure; this crate owns the
//! side effects and the cooperative-cancellation machinery around them.

use bucket_config::ConfigStore;

pub mod driver;
pub mod error;
pub mod failover;
pub mod interfaces;
pub mod safety;

pub use driver::{RebalanceParams, RebalancePlan, Rebalancer, RebalancerBuilder};
pub use error::RebalanceError;
pub use failover::failover_buckets;
pub use interfaces::{
    ClusterMembership, ConfigReplication, EngineControl, Janitor, MoverError, NodeProgress,
    ProgressFn, ProgressSink, VBucketMover,
};
pub use safety::failover_warnings;

/// The set of collaborator implementations a [`Rebalancer`] is wired to.
///
/// Bundling them as associated types keeps the driver generic over one
/// parameter instead of seven.
pub trait RebalancerTypes: Send + Sync + 'static {
    type Store: ConfigStore + 'static;
    type Membership: ClusterMembership;
    type Engine: EngineControl;
    type Mover: VBucketMover;
    type Janitor: Janitor;
    type Replication: ConfigReplication;
    type Progress: ProgressSink;
}
