//! The narrow read/mutate API over the config store.

use crate::{AuthType, BucketConfig, BucketError, BucketList, BucketType, ConfigStore};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use vbucket_map::{NodeId, VBucketMap};

static VALID_BUCKET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A[A-Za-z0-9._%-]+\z").expect("bucket name regex is valid"));

/// Partial property update for [`BucketFacade::update_bucket_props`];
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct BucketProps {
    pub num_replicas: Option<usize>,
    pub ram_quota: Option<u64>,
    pub auth_type: Option<AuthType>,
    pub sasl_password: Option<String>,
}

/// Narrow facade over the config store's buckets subtree.
///
/// Every mutation goes through the store's atomic update primitive, so
/// concurrent writers only ever observe complete states. A bucket name
/// that vanished between read and update surfaces as
/// [`BucketError::NotFound`].
pub struct BucketFacade<S> {
    store: Arc<S>,
    /// Ports already claimed by node services (memcached, moxi, admin web);
    /// new proxy ports must not collide with these.
    reserved_ports: Vec<u16>,
}

impl<S: ConfigStore> BucketFacade<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            reserved_ports: Vec::new(),
        }
    }

    pub fn with_reserved_ports(store: Arc<S>, reserved_ports: Vec<u16>) -> Self {
        Self {
            store,
            reserved_ports,
        }
    }

    /// All buckets, in the store's stable iteration order.
    pub fn get_buckets(&self) -> BucketList {
        self.store.bucket_configs()
    }

    pub fn get_bucket(&self, name: &str) -> Result<BucketConfig, BucketError> {
        self.store
            .bucket_configs()
            .into_iter()
            .find(|(bucket, _)| bucket == name)
            .map(|(_, config)| config)
            .ok_or_else(|| BucketError::NotFound(name.to_owned()))
    }

    pub fn set_map(&self, name: &str, map: VBucketMap) -> Result<(), BucketError> {
        self.store.update_bucket_configs(&mut |configs| {
            let config = find_mut(configs, name)?;
            if !config.is_membase() {
                return Err(BucketError::NoMap(name.to_owned()));
            }
            config.map = Some(map.clone());
            Ok(())
        })
    }

    pub fn set_servers(&self, name: &str, servers: Vec<NodeId>) -> Result<(), BucketError> {
        self.store.update_bucket_configs(&mut |configs| {
            find_mut(configs, name)?.servers = servers.clone();
            Ok(())
        })
    }

    /// Applies a partial property update, optionally asserting the bucket's
    /// type first.
    pub fn update_bucket_props(
        &self,
        expected_type: Option<BucketType>,
        name: &str,
        props: BucketProps,
    ) -> Result<(), BucketError> {
        self.store.update_bucket_configs(&mut |configs| {
            let config = find_mut(configs, name)?;
            if let Some(expected) = expected_type
                && config.bucket_type != expected
            {
                return Err(BucketError::TypeMismatch {
                    bucket: name.to_owned(),
                    expected,
                    actual: config.bucket_type,
                });
            }
            if let Some(num_replicas) = props.num_replicas {
                config.num_replicas = num_replicas;
            }
            if let Some(ram_quota) = props.ram_quota {
                config.ram_quota = ram_quota;
            }
            if let Some(auth_type) = props.auth_type {
                config.auth_type = auth_type;
            }
            if let Some(password) = &props.sasl_password {
                config.sasl_password = password.clone();
            }
            Ok(())
        })
    }

    pub fn create_bucket(&self, name: &str, config: BucketConfig) -> Result<(), BucketError> {
        if !valid_bucket_name(name) {
            return Err(BucketError::InvalidBucketName(name.to_owned()));
        }
        self.store.update_bucket_configs(&mut |configs| {
            if configs.iter().any(|(bucket, _)| bucket == name) {
                return Err(BucketError::AlreadyExists(name.to_owned()));
            }
            if let Some(port) = config.moxi_port {
                let taken = self.reserved_ports.contains(&port)
                    || configs
                        .iter()
                        .any(|(_, other)| other.moxi_port == Some(port));
                if taken {
                    return Err(BucketError::PortConflict(port));
                }
            }
            configs.push((name.to_owned(), config.clone()));
            Ok(())
        })
    }

    pub fn delete_bucket(&self, name: &str) -> Result<(), BucketError> {
        self.store.update_bucket_configs(&mut |configs| {
            let before = configs.len();
            configs.retain(|(bucket, _)| bucket != name);
            if configs.len() == before {
                return Err(BucketError::NotFound(name.to_owned()));
            }
            Ok(())
        })
    }
}

fn find_mut<'a>(
    configs: &'a mut BucketList,
    name: &str,
) -> Result<&'a mut BucketConfig, BucketError> {
    configs
        .iter_mut()
        .find(|(bucket, _)| bucket == name)
        .map(|(_, config)| config)
        .ok_or_else(|| BucketError::NotFound(name.to_owned()))
}

fn valid_bucket_name(name: &str) -> bool {
    name != "." && name != ".." && VALID_BUCKET_NAME.is_match(name)
}
