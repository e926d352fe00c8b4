//! Payload storage for fetched origin responses.
//!
//! Entries are held behind `Arc` so a reader keeps a consistent snapshot even
//! if a refetch replaces the entry while the response is being written.

use std::sync::{Arc, Mutex};

use lru::LruCache;
use metrics::counter;

use crate::domain::entities::CachedResource;

use super::config::CacheConfig;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";
const METRIC_CACHE_EVICT: &str = "yacdn_cache_evict_total";

/// Net byte change caused by one insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageDelta {
    pub added: u64,
    /// Bytes released by the replaced entry and any LRU eviction.
    pub freed: u64,
}

impl StorageDelta {
    pub fn net(&self) -> i64 {
        let added = i64::try_from(self.added).unwrap_or(i64::MAX);
        let freed = i64::try_from(self.freed).unwrap_or(i64::MAX);
        added.saturating_sub(freed)
    }
}

pub struct PayloadStore {
    entries: Mutex<LruCache<String, Arc<CachedResource>>>,
}

impl PayloadStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.max_entries_non_zero())),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<CachedResource>> {
        mutex_lock(&self.entries, SOURCE, "get").get(key).cloned()
    }

    /// Replace the entry for `key` whole, evicting the least recently used
    /// entry when the store is full.
    pub fn insert(&self, key: String, resource: Arc<CachedResource>) -> StorageDelta {
        let added = resource.content_length();
        let mut entries = mutex_lock(&self.entries, SOURCE, "insert");
        let mut freed = entries
            .pop(&key)
            .map(|previous| previous.content_length())
            .unwrap_or(0);

        if let Some((_, evicted)) = entries.push(key, resource) {
            counter!(METRIC_CACHE_EVICT).increment(1);
            freed += evicted.content_length();
        }

        StorageDelta { added, freed }
    }

    /// Total bytes currently held.
    pub fn total_bytes(&self) -> u64 {
        mutex_lock(&self.entries, SOURCE, "total_bytes")
            .iter()
            .map(|(_, resource)| resource.content_length())
            .sum()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
