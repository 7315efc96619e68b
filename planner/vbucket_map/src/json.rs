//! Wire form of a vbucket map for the admin surface.

use crate::{NodeId, VBucketMap};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// The JSON shape smart clients consume: a sorted server list and per-vbucket
/// chains of indices into it, `-1` marking an unassigned slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VBucketServerMap {
    pub hash_algorithm: String,
    pub num_replicas: usize,
    pub server_list: Vec<NodeId>,
    pub v_bucket_map: Vec<Vec<i32>>,
}

impl VBucketServerMap {
    /// Builds the wire form from a map and the bucket's server list.
    ///
    /// The server list is the sorted union of the bucket's servers and every
    /// node appearing in any chain, so a chain entry always resolves.
    pub fn new(map: &VBucketMap, servers: &[NodeId], num_replicas: usize) -> Self {
        let server_list: Vec<NodeId> = servers
            .iter()
            .cloned()
            .chain(map.nodes())
            .unique()
            .sorted()
            .collect();

        let index_of = |node: &NodeId| -> i32 {
            server_list
                .iter()
                .position(|candidate| candidate == node)
                .map_or(-1, |i| i as i32)
        };

        let v_bucket_map = map
            .chains()
            .map(|chain| {
                chain
                    .slots()
                    .iter()
                    .map(|slot| slot.as_ref().map_or(-1, |node| index_of(node)))
                    .collect()
            })
            .collect();

        Self {
            hash_algorithm: "CRC".to_owned(),
            num_replicas,
            server_list,
            v_bucket_map,
        }
    }
}
