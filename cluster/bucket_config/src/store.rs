//! The config-store boundary: reads and atomic updates of the buckets
//! subtree.

use crate::{BucketError, BucketList};
use parking_lot::RwLock;

/// Handle to the cluster configuration store.
///
/// The store owns the canonical bucket list; this trait exposes a snapshot
/// read and a single atomic update primitive. The update closure receives
/// the current list and either mutates it or rejects with a distinguished
/// error, in which case nothing is committed — the compare-and-swap shape
/// the real store provides.
pub trait ConfigStore: Send + Sync {
    /// Snapshot of the `configs` list under the `buckets` key.
    fn bucket_configs(&self) -> BucketList;

    /// Atomically update the `configs` list under the `buckets` key.
    fn update_bucket_configs(
        &self,
        update: &mut dyn FnMut(&mut BucketList) -> Result<(), BucketError>,
    ) -> Result<(), BucketError>;
}

/// In-process store used by tests and single-node embeddings.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    configs: RwLock<BucketList>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn bucket_configs(&self) -> BucketList {
        self.configs.read().clone()
    }

    fn update_bucket_configs(
        &self,
        update: &mut dyn FnMut(&mut BucketList) -> Result<(), BucketError>,
    ) -> Result<(), BucketError> {
        let mut guard = self.configs.write();
        let mut next = guard.clone();
        update(&mut next)?;
        *guard = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BucketConfig;

    #[test]
    fn rejected_updates_commit_nothing() {
        let store = MemoryConfigStore::new();
        store
            .update_bucket_configs(&mut |configs| {
                configs.push(("default".to_owned(), BucketConfig::membase(1, 16, 128)));
                Ok(())
            })
            .unwrap();

        let result = store.update_bucket_configs(&mut |configs| {
            configs.clear();
            Err(BucketError::NotFound("whatever".to_owned()))
        });
        assert!(result.is_err());
        assert_eq!(store.bucket_configs().len(), 1);
    }
}
