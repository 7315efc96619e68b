//! Core vbucket map types and the pure primitives the layout planner is
//! built from.
//!
//! A bucket's keyspace is partitioned into vbuckets; each vbucket is served
//! by an ordered [`Chain`] of nodes whose head is the master and whose tail
//! are the replicas in priority order. A [`VBucketMap`] is the full sequence
//! of chains, indexed by vbucket id. Everything in this crate is pure: no
//! I/O, no clocks, no randomness.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

pub mod histogram;
pub mod json;

pub use histogram::Histogram;
pub use json::VBucketServerMap;

/// Identity of a data node, in `host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

/// The ordered list of nodes serving one vbucket.
///
/// Slot 0 is the master; slots `1..` are replicas in priority order. A slot
/// holding `None` is unassigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chain(Vec<Option<NodeId>>);

impl Chain {
    pub fn new(slots: Vec<Option<NodeId>>) -> Self {
        Self(slots)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn slots(&self) -> &[Option<NodeId>] {
        &self.0
    }

    pub fn master(&self) -> Option<&NodeId> {
        self.0.first().and_then(Option::as_ref)
    }

    /// Iterates the assigned nodes of this chain, skipping unassigned slots.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.0.iter().flatten()
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes().any(|n| n == node)
    }

    /// Returns a copy of this chain with slot `turn` replaced.
    ///
    /// Slots past `turn` are untouched; see [`VBucketMap::apply_move`] for
    /// the variant that also invalidates them.
    pub fn replace_at(&self, turn: usize, new: Option<NodeId>) -> Chain {
        let mut slots = self.0.clone();
        if let Some(slot) = slots.get_mut(turn) {
            *slot = new;
        }
        Chain(slots)
    }

    /// Number of slots in this chain held by a live node.
    pub fn live_copies(&self, live: &HashSet<NodeId>) -> usize {
        self.nodes().filter(|n| live.contains(n)).count()
    }
}

/// A full vbucket map: one chain per vbucket, all chains the same length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VBucketMap(Vec<Chain>);

impl VBucketMap {
    pub fn from_chains(chains: Vec<Chain>) -> Self {
        Self(chains)
    }

    /// Number of vbuckets.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Chain length (`num_replicas + 1`), or zero for an empty map.
    pub fn chain_len(&self) -> usize {
        self.0.first().map_or(0, Chain::len)
    }

    pub fn chain(&self, vbucket: usize) -> Option<&Chain> {
        self.0.get(vbucket)
    }

    pub fn chains(&self) -> impl Iterator<Item = &Chain> {
        self.0.iter()
    }

    /// Transposes the map into one slot-list per turn.
    ///
    /// Element `i` of the result holds slot `i` of every chain, in vbucket
    /// order.
    pub fn turns(&self) -> Vec<Vec<Option<NodeId>>> {
        (0..self.chain_len())
            .map(|turn| {
                self.0
                    .iter()
                    .map(|chain| chain.slots()[turn].clone())
                    .collect()
            })
            .collect()
    }

    /// Builds one histogram per turn over the given candidate nodes.
    ///
    /// Every node in `servers` is present in every histogram (zero-filled if
    /// it serves nothing on that turn); nodes outside `servers` are omitted.
    pub fn histograms(&self, servers: &[NodeId]) -> Vec<Histogram> {
        (0..self.chain_len())
            .map(|turn| {
                let mut histogram = Histogram::zeroed(servers);
                for chain in &self.0 {
                    if let Some(node) = &chain.slots()[turn] {
                        histogram.increment(node);
                    }
                }
                histogram
            })
            .collect()
    }

    /// Assigns `new` to slot `turn` of the given chain and unassigns every
    /// slot past it.
    ///
    /// The tail slots are invalidated because their data predates the move;
    /// replica repair fills them back in.
    pub fn apply_move(&mut self, turn: usize, vbucket: usize, new: NodeId) {
        if let Some(chain) = self.0.get_mut(vbucket) {
            if let Some(slot) = chain.0.get_mut(turn) {
                *slot = Some(new);
            }
            for slot in chain.0.iter_mut().skip(turn + 1) {
                *slot = None;
            }
        }
    }

    /// Every node appearing in any chain, in sorted order.
    pub fn nodes(&self) -> BTreeSet<NodeId> {
        self.0
            .iter()
            .flat_map(|chain| chain.nodes().cloned())
            .collect()
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.0.iter().any(|chain| chain.contains(node))
    }

    /// Minimum over all chains of the number of live copies, or `None` for
    /// an empty map.
    pub fn min_live_copies(&self, live: &HashSet<NodeId>) -> Option<usize> {
        self.0.iter().map(|chain| chain.live_copies(live)).min()
    }
}

/// Computes the first map for a fresh bucket.
///
/// Chain `v` takes `num_replicas + 1` nodes from `servers` rotated by
/// `v mod |servers|`, padding with unassigned slots when the server list is
/// shorter than the chain. Deterministic; no randomness.
pub fn generate_initial_map(
    num_replicas: usize,
    num_vbuckets: usize,
    servers: &[NodeId],
) -> VBucketMap {
    let chain_len = num_replicas + 1;
    let chains = (0..num_vbuckets)
        .map(|v| {
            let mut slots = Vec::with_capacity(chain_len);
            if !servers.is_empty() {
                let start = v % servers.len();
                slots.extend(
                    servers
                        .iter()
                        .cycle()
                        .skip(start)
                        .take(chain_len.min(servers.len()))
                        .cloned()
                        .map(Some),
                );
            }
            slots.resize(chain_len, None);
            Chain::new(slots)
        })
        .collect();
    VBucketMap::from_chains(chains)
}
