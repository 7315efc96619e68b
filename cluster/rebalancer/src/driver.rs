//! The cluster-wide rebalance driver.
//!
//! One driver instance runs per rebalance; the surrounding orchestrator
//! guarantees it is never reentered. Buckets are processed strictly one at
//! a time to avoid overloading the cluster, and within a bucket the phase
//! order is fixed: master moves, first-replica balancing with data
//! movement, then progressively deeper turns as pure map updates with
//! replica repair filling in behind them.
//!
//! Cancellation is cooperative. The stop signal is observed at the phase
//! boundaries and during the three suspension points (engine readiness
//! polling, mover waits, config acknowledgements); once a map has been
//! touched, every stop or failure path runs fixup before surfacing so the
//! bucket is left operable.

use crate::error::RebalanceError;
use crate::interfaces::{
    ClusterMembership, ConfigReplication, EngineControl, Janitor, MoverError, NodeProgress,
    ProgressSink, VBucketMover,
};
use crate::RebalancerTypes;
use bucket_config::{BucketError, BucketFacade, BucketType};
use map_planner::{balance_nodes, master_moves, new_replicas, Move};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use vbucket_map::{generate_initial_map, NodeId};

/// Node sets for one rebalance run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalancePlan {
    /// Nodes that remain in the cluster and absorb all data.
    pub keep_nodes: Vec<NodeId>,
    /// Live nodes being removed; their data is migrated off first.
    pub eject_nodes: Vec<NodeId>,
    /// Unreachable nodes being removed; nothing can be migrated off them.
    pub failed_nodes: Vec<NodeId>,
}

/// Tunables with the observed production defaults.
#[derive(Debug, Clone)]
pub struct RebalanceParams {
    /// Polling rounds to wait for every engine to pick up a bucket.
    pub readiness_attempts: usize,
    /// Delay between readiness polling rounds.
    pub readiness_poll: Duration,
}

impl Default for RebalanceParams {
    fn default() -> Self {
        Self {
            readiness_attempts: 10,
            readiness_poll: Duration::from_secs(1),
        }
    }
}

/// Builds a [`Rebalancer`].
pub struct RebalancerBuilder<T: RebalancerTypes> {
    buckets: Option<BucketFacade<T::Store>>,
    membership: Option<T::Membership>,
    engine: Option<T::Engine>,
    mover: Option<T::Mover>,
    janitor: Option<T::Janitor>,
    replication: Option<T::Replication>,
    progress: Option<T::Progress>,
    local_node: Option<NodeId>,
    params: RebalanceParams,
}

impl<T: RebalancerTypes> Default for RebalancerBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RebalancerTypes> RebalancerBuilder<T> {
    pub fn new() -> Self {
        Self {
            buckets: None,
            membership: None,
            engine: None,
            mover: None,
            janitor: None,
            replication: None,
            progress: None,
            local_node: None,
            params: RebalanceParams::default(),
        }
    }

    pub fn buckets(mut self, buckets: BucketFacade<T::Store>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    pub fn membership(mut self, membership: T::Membership) -> Self {
        self.membership = Some(membership);
        self
    }

    pub fn engine(mut self, engine: T::Engine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn mover(mut self, mover: T::Mover) -> Self {
        self.mover = Some(mover);
        self
    }

    pub fn janitor(mut self, janitor: T::Janitor) -> Self {
        self.janitor = Some(janitor);
        self
    }

    pub fn replication(mut self, replication: T::Replication) -> Self {
        self.replication = Some(replication);
        self
    }

    pub fn progress(mut self, progress: T::Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn local_node(mut self, local_node: NodeId) -> Self {
        self.local_node = Some(local_node);
        self
    }

    pub fn params(mut self, params: RebalanceParams) -> Self {
        self.params = params;
        self
    }

    pub fn build(self) -> Result<Rebalancer<T>, String> {
        Ok(Rebalancer {
            buckets: self.buckets.ok_or("Cannot build Rebalancer without buckets")?,
            membership: self
                .membership
                .ok_or("Cannot build Rebalancer without membership")?,
            engine: self.engine.ok_or("Cannot build Rebalancer without engine")?,
            mover: self.mover.ok_or("Cannot build Rebalancer without mover")?,
            janitor: self.janitor.ok_or("Cannot build Rebalancer without janitor")?,
            replication: self
                .replication
                .ok_or("Cannot build Rebalancer without replication")?,
            progress: self
                .progress
                .ok_or("Cannot build Rebalancer without progress")?,
            local_node: self
                .local_node
                .ok_or("Cannot build Rebalancer without local_node")?,
            params: self.params,
        })
    }
}

/// Drives one full cluster rebalance. See the module docs for the phase
/// structure.
pub struct Rebalancer<T: RebalancerTypes> {
    buckets: BucketFacade<T::Store>,
    membership: T::Membership,
    engine: T::Engine,
    mover: T::Mover,
    janitor: T::Janitor,
    replication: T::Replication,
    progress: T::Progress,
    local_node: NodeId,
    params: RebalanceParams,
}

impl<T: RebalancerTypes> Rebalancer<T> {
    pub fn builder() -> RebalancerBuilder<T> {
        RebalancerBuilder::new()
    }

    /// Runs the rebalance described by `plan`.
    ///
    /// `stop` is the cooperative cancellation signal; flipping it to `true`
    /// makes the driver wind down at the next boundary, fix the current
    /// bucket up and return [`RebalanceError::Stopped`].
    pub async fn rebalance(
        &self,
        plan: &RebalancePlan,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), RebalanceError> {
        info!(
            keep = plan.keep_nodes.len(),
            eject = plan.eject_nodes.len(),
            failed = plan.failed_nodes.len(),
            active = self.membership.actual_active_nodes().len(),
            "Starting rebalance"
        );

        // Failed nodes leave membership before anything moves; if the local
        // node is among them its departure is deferred to the very end.
        let failed_others: Vec<NodeId> = plan
            .failed_nodes
            .iter()
            .filter(|node| **node != self.local_node)
            .cloned()
            .collect();
        if !failed_others.is_empty() {
            self.membership.deactivate(&failed_others).await;
        }

        let buckets = self.buckets.get_buckets();
        let total = buckets.len();
        for (index, (name, config)) in buckets.iter().enumerate() {
            check_stop(&stop)?;
            match config.bucket_type {
                BucketType::Memcached => {
                    match self.buckets.set_servers(name, plan.keep_nodes.clone()) {
                        Err(BucketError::NotFound(_)) => {
                            warn!(bucket = name.as_str(), "Bucket deleted during rebalance");
                        }
                        other => other?,
                    }
                }
                BucketType::Membase => {
                    match self
                        .rebalance_bucket(index, total, name, plan, &mut stop)
                        .await
                    {
                        Ok(()) => {}
                        Err(RebalanceError::BucketNotFound(_)) => {
                            warn!(bucket = name.as_str(), "Bucket deleted during rebalance");
                        }
                        Err(err @ RebalanceError::WaitForEngineFailed { .. }) => {
                            // Nothing moved for this bucket yet, so there is
                            // nothing to fix up.
                            return Err(err);
                        }
                        Err(err) => {
                            self.fixup(name, plan).await;
                            if !matches!(err, RebalanceError::Stopped) {
                                self.eject_self_if_failed(plan).await;
                            }
                            return Err(err);
                        }
                    }
                }
            }
        }

        self.replication.synchronize().await;
        self.eject_departed(plan).await;
        info!("Rebalance complete");
        Ok(())
    }

    /// Runs the full phase sequence for one membase bucket.
    async fn rebalance_bucket(
        &self,
        index: usize,
        total: usize,
        name: &str,
        plan: &RebalancePlan,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), RebalanceError> {
        let config = self.buckets.get_bucket(name)?;
        self.engine.disable_inbound_replication(name).await;

        // Every node that may hold data for this bucket must be serving it
        // before the mover starts.
        let all_nodes = union(&plan.keep_nodes, &plan.eject_nodes);
        self.buckets.set_servers(name, all_nodes.clone())?;
        self.wait_for_engines(name, &all_nodes, stop).await?;
        self.janitor.cleanup(name).await;

        // A fresh bucket reaches its first rebalance without a map.
        let mut map = match config.map {
            Some(map) => map,
            None => generate_initial_map(config.num_replicas, config.num_vbuckets, &plan.keep_nodes),
        };
        // Ejected and failed nodes alike are leaving; no vbucket may remain
        // on any of them.
        let evacuate: HashSet<NodeId> = plan
            .eject_nodes
            .iter()
            .chain(&plan.failed_nodes)
            .cloned()
            .collect();

        let mut histograms = map.histograms(&plan.keep_nodes);
        let moves = master_moves(&map, &evacuate, &mut histograms[0]);
        info!(
            bucket = name,
            moves = moves.len(),
            "Moving vbucket masters"
        );
        self.run_mover(index, total, name, moves.clone(), stop).await?;
        for mv in &moves {
            map.apply_move(0, mv.vbucket, mv.new.clone());
        }
        check_stop(stop)?;

        if map.chain_len() > 1 {
            let mut histograms = map.histograms(&plan.keep_nodes);
            let moves = balance_nodes(&map, &mut histograms[1], 1);
            debug!(
                bucket = name,
                moves = moves.len(),
                "Balancing first replicas"
            );
            self.run_mover(index, total, name, moves.clone(), stop).await?;
            for mv in &moves {
                map.apply_move(1, mv.vbucket, mv.new.clone());
            }
        }

        let mut histograms = map.histograms(&plan.keep_nodes);
        map = new_replicas(&map, &evacuate, &mut histograms);
        self.buckets.set_map(name, map.clone())?;
        check_stop(stop)?;

        // Deeper turns never move data: replica repair is about to refill
        // whatever the balance pass invalidates, so the map update suffices.
        for turn in 2..map.chain_len() {
            let mut histograms = map.histograms(&plan.keep_nodes);
            let moves = balance_nodes(&map, &mut histograms[turn], turn);
            for mv in moves {
                map.apply_move(turn, mv.vbucket, mv.new);
            }
            let mut histograms = map.histograms(&plan.keep_nodes);
            map = new_replicas(&map, &evacuate, &mut histograms);
            check_stop(stop)?;
        }

        self.buckets.set_map(name, map)?;
        self.buckets.set_servers(name, plan.keep_nodes.clone())?;
        self.replication.push().await;
        info!(bucket = name, "Bucket rebalanced");
        Ok(())
    }

    /// Hands a move batch to the external mover, scaling its per-bucket
    /// progress into the cluster-wide `(index + fraction) / total` form.
    async fn run_mover(
        &self,
        index: usize,
        total: usize,
        name: &str,
        moves: Vec<Move>,
        stop: &watch::Receiver<bool>,
    ) -> Result<(), RebalanceError> {
        let total = total.max(1) as f64;
        let sink = &self.progress;
        let wrap = move |node_progress: NodeProgress| {
            let scaled = node_progress
                .into_iter()
                .map(|(node, fraction)| (node, (index as f64 + fraction) / total))
                .collect();
            sink.update_progress(scaled);
        };
        self.mover
            .start(name, moves, &wrap, stop.clone())
            .await
            .map_err(|err| match err {
                MoverError::Stopped => RebalanceError::Stopped,
                MoverError::Failed(reason) => RebalanceError::MoverFailed {
                    bucket: name.to_owned(),
                    reason,
                },
            })
    }

    /// Polls until every node's engine serves the bucket, or the attempt
    /// budget runs out.
    async fn wait_for_engines(
        &self,
        bucket: &str,
        nodes: &[NodeId],
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), RebalanceError> {
        let mut pending: Vec<NodeId> = nodes.to_vec();
        for attempt in 1..=self.params.readiness_attempts {
            let mut waiting = Vec::new();
            for node in &pending {
                if !self.engine.connected(node, bucket).await {
                    waiting.push(node.clone());
                }
            }
            if waiting.is_empty() {
                return Ok(());
            }
            debug!(
                bucket,
                attempt,
                waiting = waiting.len(),
                "Waiting for engines to pick up the bucket"
            );
            pending = waiting;
            if attempt == self.params.readiness_attempts {
                break;
            }
            tokio::select! {
                _ = stop_requested(stop) => return Err(RebalanceError::Stopped),
                _ = sleep(self.params.readiness_poll) => {}
            }
        }
        Err(RebalanceError::WaitForEngineFailed {
            bucket: bucket.to_owned(),
            nodes: pending,
        })
    }

    /// Leaves the bucket operable after a stop or failure: every replica
    /// slot a remaining node can legally fill is filled, and the server
    /// list covers every node that may still hold data.
    ///
    /// Fixup ignores the stop signal; it must run to completion.
    async fn fixup(&self, name: &str, plan: &RebalancePlan) {
        info!(bucket = name, "Fixing bucket up after interrupted rebalance");
        let evacuate: HashSet<NodeId> = plan
            .eject_nodes
            .iter()
            .chain(&plan.failed_nodes)
            .cloned()
            .collect();
        if let Ok(config) = self.buckets.get_bucket(name)
            && let Some(map) = config.map
        {
            let mut histograms = map.histograms(&plan.keep_nodes);
            let repaired = new_replicas(&map, &evacuate, &mut histograms);
            if let Err(err) = self.buckets.set_map(name, repaired) {
                warn!(bucket = name, error = %err, "Failed to commit repaired map");
            }
        }
        if let Err(err) = self
            .buckets
            .set_servers(name, union(&plan.keep_nodes, &plan.eject_nodes))
        {
            warn!(bucket = name, error = %err, "Failed to restore server list");
        }
    }

    /// Ejects every departing node once all buckets are done, local node
    /// last.
    async fn eject_departed(&self, plan: &RebalancePlan) {
        let departed = union(&plan.eject_nodes, &plan.failed_nodes);
        let leaving_self = departed.contains(&self.local_node);
        let others: Vec<NodeId> = departed
            .into_iter()
            .filter(|node| *node != self.local_node)
            .collect();
        if !others.is_empty() {
            self.membership.deactivate(&others).await;
        }
        if leaving_self {
            self.membership.leave(&self.local_node).await;
        }
    }

    /// Best-effort self-ejection on failure paths, so failing the local
    /// node out still reaches its end.
    async fn eject_self_if_failed(&self, plan: &RebalancePlan) {
        if plan.failed_nodes.contains(&self.local_node) {
            warn!("This node is being failed out; leaving the cluster");
            self.membership.leave(&self.local_node).await;
        }
    }
}

fn check_stop(stop: &watch::Receiver<bool>) -> Result<(), RebalanceError> {
    if *stop.borrow() {
        Err(RebalanceError::Stopped)
    } else {
        Ok(())
    }
}

/// Resolves once the stop signal flips to `true`. A closed channel means no
/// stop can ever arrive, so the future parks and lets competing branches
/// win.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn union(a: &[NodeId], b: &[NodeId]) -> Vec<NodeId> {
    let mut all = a.to_vec();
    for node in b {
        if !all.contains(node) {
            all.push(node.clone());
        }
    }
    all
}
