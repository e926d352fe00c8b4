//! Process-wide usage counters kept in the key-value store.

use std::sync::Arc;

use yacdn_api_types::{PopularUrl, StatsReport};

use crate::application::repos::KeyValueStore;
use crate::domain::error::StoreError;

pub const HITS_KEY: &str = "cdnhits";
pub const BYTES_SERVED_KEY: &str = "cdndata";
pub const STORAGE_USAGE_KEY: &str = "cache-storage-usage";
pub const POPULAR_URLS_KEY: &str = "serveurls";

/// Injected counters service; cheap to clone.
#[derive(Clone)]
pub struct UsageCounters {
    store: Arc<dyn KeyValueStore>,
}

impl UsageCounters {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Count one qualifying request and return the new total.
    pub async fn record_hit(&self) -> Result<u64, StoreError> {
        let value = self.store.incr(HITS_KEY).await?;
        Ok(non_negative(value))
    }

    pub async fn record_bytes_served(&self, bytes: u64) -> Result<(), StoreError> {
        let delta = i64::try_from(bytes).map_err(|_| StoreError::Overflow {
            key: BYTES_SERVED_KEY.to_string(),
        })?;
        self.store.incr_by(BYTES_SERVED_KEY, delta).await?;
        Ok(())
    }

    /// Apply the net change in stored payload size.
    pub async fn adjust_storage(&self, delta: i64) -> Result<(), StoreError> {
        if delta == 0 {
            return Ok(());
        }
        self.store.incr_by(STORAGE_USAGE_KEY, delta).await?;
        Ok(())
    }

    pub async fn record_popularity(&self, url: &str) -> Result<u64, StoreError> {
        self.store.zincr_by(POPULAR_URLS_KEY, 1, url).await
    }

    pub async fn top_urls(&self, limit: usize) -> Result<Vec<PopularUrl>, StoreError> {
        let entries = self.store.zrange_desc(POPULAR_URLS_KEY, limit).await?;
        Ok(entries
            .into_iter()
            .map(|(url, hits)| PopularUrl { url, hits })
            .collect())
    }

    /// Current counter values; keys that were never written read as zero.
    pub async fn snapshot(&self) -> Result<StatsReport, StoreError> {
        let (hits, data, storage) = futures::try_join!(
            self.store.get(HITS_KEY),
            self.store.get(BYTES_SERVED_KEY),
            self.store.get(STORAGE_USAGE_KEY),
        )?;

        Ok(StatsReport {
            cdn_hits: non_negative(hits.unwrap_or(0)),
            cdn_data: non_negative(data.unwrap_or(0)),
            cache_storage_usage: non_negative(storage.unwrap_or(0)),
        })
    }
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::MemoryStore;

    fn counters() -> UsageCounters {
        UsageCounters::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn snapshot_of_fresh_store_is_zero() {
        let counters = counters();
        let snapshot = counters.snapshot().await.expect("snapshot");
        assert_eq!(snapshot, StatsReport::default());
    }

    #[tokio::test]
    async fn hits_bytes_and_storage_accumulate() {
        let counters = counters();
        assert_eq!(counters.record_hit().await.expect("hit"), 1);
        assert_eq!(counters.record_hit().await.expect("hit"), 2);
        counters.record_bytes_served(120).await.expect("bytes");
        counters.adjust_storage(500).await.expect("storage");
        counters.adjust_storage(-200).await.expect("storage");

        let snapshot = counters.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.cdn_hits, 2);
        assert_eq!(snapshot.cdn_data, 120);
        assert_eq!(snapshot.cache_storage_usage, 300);
    }

    #[tokio::test]
    async fn popularity_orders_by_hits() {
        let counters = counters();
        for url in ["a?", "b?", "b?", "c?", "b?", "c?"] {
            counters.record_popularity(url).await.expect("zincr");
        }

        let top = counters.top_urls(2).await.expect("top");
        assert_eq!(
            top,
            vec![
                PopularUrl {
                    url: "b?".to_string(),
                    hits: 3
                },
                PopularUrl {
                    url: "c?".to_string(),
                    hits: 2
                },
            ]
        );
    }
}
