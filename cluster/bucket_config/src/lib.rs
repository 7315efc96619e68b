//! Bucket configuration: the typed model of the `buckets` subtree of the
//! cluster config, the store trait it lives behind, and the narrow facade
//! the rest of the system mutates it through.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::Display;
use vbucket_map::{NodeId, VBucketMap};

mod facade;
mod store;

pub use facade::{BucketFacade, BucketProps};
pub use store::{ConfigStore, MemoryConfigStore};

/// The `configs` list under the `buckets` key, in stable iteration order.
pub type BucketList = Vec<(String, BucketConfig)>;

/// What kind of engine backs a bucket.
///
/// Only `membase` buckets carry a vbucket map; `memcached` buckets locate
/// keys with a client-side hash ring and are excluded from every
/// map-manipulating operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BucketType {
    Membase,
    Memcached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthType {
    Sasl,
    None,
}

/// One bucket's configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub bucket_type: BucketType,
    pub num_replicas: usize,
    pub num_vbuckets: usize,
    /// Nodes currently bound to this bucket.
    pub servers: Vec<NodeId>,
    /// The vbucket map; `None` before first placement and always `None` for
    /// memcached buckets.
    pub map: Option<VBucketMap>,
    pub ram_quota: u64,
    pub auth_type: AuthType,
    pub sasl_password: String,
    /// Dedicated proxy (moxi) port, if the bucket runs one.
    pub moxi_port: Option<u16>,
}

impl BucketConfig {
    pub fn membase(num_replicas: usize, num_vbuckets: usize, ram_quota: u64) -> Self {
        Self {
            bucket_type: BucketType::Membase,
            num_replicas,
            num_vbuckets,
            servers: Vec::new(),
            map: None,
            ram_quota,
            auth_type: AuthType::Sasl,
            sasl_password: String::new(),
            moxi_port: None,
        }
    }

    pub fn memcached(ram_quota: u64) -> Self {
        Self {
            bucket_type: BucketType::Memcached,
            num_replicas: 0,
            num_vbuckets: 0,
            servers: Vec::new(),
            map: None,
            ram_quota,
            auth_type: AuthType::Sasl,
            sasl_password: String::new(),
            moxi_port: None,
        }
    }

    pub fn is_membase(&self) -> bool {
        self.bucket_type == BucketType::Membase
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketError {
    /// The named bucket is not in the config (raced deletion included).
    NotFound(String),
    AlreadyExists(String),
    InvalidBucketName(String),
    PortConflict(u16),
    TypeMismatch {
        bucket: String,
        expected: BucketType,
        actual: BucketType,
    },
    /// Map operation against a bucket type that has no map.
    NoMap(String),
}

impl fmt::Display for BucketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketError::NotFound(name) => write!(f, "bucket {name} not found"),
            BucketError::AlreadyExists(name) => write!(f, "bucket {name} already exists"),
            BucketError::InvalidBucketName(name) => write!(f, "invalid bucket name {name:?}"),
            BucketError::PortConflict(port) => write!(f, "proxy port {port} already in use"),
            BucketError::TypeMismatch {
                bucket,
                expected,
                actual,
            } => write!(f, "bucket {bucket} is {actual}, expected {expected}"),
            BucketError::NoMap(name) => write!(f, "bucket {name} has no vbucket map"),
        }
    }
}

impl std::error::Error for BucketError {}
