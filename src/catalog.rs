//! Read-only lookup across every configured archive.

use crate::archive::ArchiveConfig;
use crate::error::Result;
use crate::models::PackageRecord;
use crate::storage::CacheStore;
use std::sync::Arc;

/// Aggregates the cache stores of all archives, in configuration order.
#[derive(Clone)]
pub struct Catalog {
    stores: Vec<Arc<CacheStore>>,
}

impl Catalog {
    pub fn new(stores: Vec<Arc<CacheStore>>) -> Self {
        Self { stores }
    }

    pub fn from_archives(archives: &[Arc<ArchiveConfig>]) -> Self {
        Self::new(archives.iter().map(|a| Arc::clone(&a.store)).collect())
    }

    /// Every record named `name`: archives in configuration order, then
    /// pockets in configuration order within each archive.
    ///
    /// An unknown name yields an empty list. Records that appear in more than
    /// one archive are all returned.
    pub fn lookup(&self, name: &str) -> Result<Vec<PackageRecord>> {
        let mut records = Vec::new();
        for store in &self.stores {
            records.extend(store.get(name)?);
        }
        Ok(records)
    }
}
