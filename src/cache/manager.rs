//! Fetch-through cache with staleness control and single-flight fetches.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::application::counters::UsageCounters;
use crate::domain::{entities::CachedResource, error::OriginError};

use super::config::CacheConfig;
use super::flight::{FlightLeader, FlightTicket, FlightWaiter, InFlightFetches};
use super::keys::CacheKey;
use super::origin::{OriginFetcher, OriginResponse};
use super::store::PayloadStore;

const METRIC_CACHE_HIT: &str = "yacdn_cache_hit_total";
const METRIC_CACHE_MISS: &str = "yacdn_cache_miss_total";
const METRIC_ORIGIN_FETCH: &str = "yacdn_origin_fetch_total";
const METRIC_ORIGIN_ERROR: &str = "yacdn_origin_error_total";
const METRIC_ORIGIN_FETCH_MS: &str = "yacdn_origin_fetch_ms";
const METRIC_COALESCED: &str = "yacdn_singleflight_coalesced_total";

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Where a retrieved payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalSource {
    /// Served from a cached entry inside its freshness window.
    Fresh,
    /// This caller led a new origin fetch.
    Fetched,
    /// This caller joined a fetch another caller had already started.
    Coalesced,
}

#[derive(Debug, Clone)]
pub struct Retrieved {
    pub resource: Arc<CachedResource>,
    pub source: RetrievalSource,
}

impl Retrieved {
    pub fn content_length(&self) -> u64 {
        self.resource.content_length()
    }

    pub fn content_type(&self) -> &str {
        &self.resource.content_type
    }
}

/// Resolves cache keys to content, fetching from origin when an entry is
/// missing or stale.
///
/// Failed fetches leave any previous entry in place, but a stale entry is
/// never served as a fallback: the next call retries the origin.
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<PayloadStore>,
    flights: InFlightFetches,
    origin: Arc<dyn OriginFetcher>,
    counters: UsageCounters,
}

impl CacheManager {
    pub fn new(
        config: CacheConfig,
        origin: Arc<dyn OriginFetcher>,
        counters: UsageCounters,
    ) -> Self {
        let store = Arc::new(PayloadStore::new(&config));
        Self {
            store,
            flights: InFlightFetches::new(),
            origin,
            counters,
        }
    }

    pub fn store(&self) -> &PayloadStore {
        &self.store
    }

    /// Number of origin fetches currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    #[instrument(skip_all, fields(key = %key, max_age_ms = max_age.as_millis() as u64))]
    pub async fn retrieve(
        &self,
        key: &CacheKey,
        max_age: Duration,
    ) -> Result<Retrieved, OriginError> {
        if let Some(resource) = self.fresh_entry(key, max_age) {
            counter!(METRIC_CACHE_HIT).increment(1);
            debug!(cache = "payload", outcome = "hit", "serving cached payload");
            return Ok(Retrieved {
                resource,
                source: RetrievalSource::Fresh,
            });
        }

        counter!(METRIC_CACHE_MISS).increment(1);

        match self.flights.join(key.as_str()) {
            FlightTicket::Leader(leader, waiter) => self.lead(leader, waiter, key, max_age).await,
            FlightTicket::Follower(waiter) => {
                counter!(METRIC_COALESCED).increment(1);
                debug!(
                    cache = "payload",
                    outcome = "coalesced",
                    "joining in-flight origin fetch"
                );
                let resource = waiter.wait().await?;
                Ok(Retrieved {
                    resource,
                    source: RetrievalSource::Coalesced,
                })
            }
        }
    }

    async fn lead(
        &self,
        leader: FlightLeader,
        waiter: FlightWaiter,
        key: &CacheKey,
        max_age: Duration,
    ) -> Result<Retrieved, OriginError> {
        // A flight may have stored this key between the freshness check and the join.
        if let Some(resource) = self.fresh_entry(key, max_age) {
            leader.complete(Ok(Arc::clone(&resource)));
            counter!(METRIC_CACHE_HIT).increment(1);
            return Ok(Retrieved {
                resource,
                source: RetrievalSource::Fresh,
            });
        }

        debug!(cache = "payload", outcome = "miss", "starting origin fetch");
        self.spawn_fetch(leader, key.clone());
        let resource = waiter.wait().await?;
        Ok(Retrieved {
            resource,
            source: RetrievalSource::Fetched,
        })
    }

    fn fresh_entry(&self, key: &CacheKey, max_age: Duration) -> Option<Arc<CachedResource>> {
        let resource = self.store.get(key.as_str())?;
        resource
            .is_fresh(max_age, Instant::now())
            .then_some(resource)
    }

    /// Run the fetch on its own task so that a caller going away does not
    /// cancel it for the remaining waiters.
    fn spawn_fetch(&self, leader: FlightLeader, key: CacheKey) {
        let origin = Arc::clone(&self.origin);
        let store = Arc::clone(&self.store);
        let counters = self.counters.clone();

        tokio::spawn(async move {
            let outcome = fetch_and_store(origin.as_ref(), &store, &counters, &key).await;
            leader.complete(outcome);
        });
    }
}

async fn fetch_and_store(
    origin: &dyn OriginFetcher,
    store: &PayloadStore,
    counters: &UsageCounters,
    key: &CacheKey,
) -> Result<Arc<CachedResource>, OriginError> {
    let started_at = Instant::now();
    counter!(METRIC_ORIGIN_FETCH).increment(1);

    let response = match origin.fetch(key.origin_url()).await {
        Ok(response) => response,
        Err(err) => {
            counter!(METRIC_ORIGIN_ERROR).increment(1);
            warn!(
                target = "yacdn::cache",
                key = %key,
                error = %err,
                "origin fetch failed"
            );
            return Err(err);
        }
    };

    let fetch_duration = started_at.elapsed();
    histogram!(METRIC_ORIGIN_FETCH_MS).record(fetch_duration.as_secs_f64() * 1000.0);

    let resource = Arc::new(build_resource(key, response, fetch_duration));
    let delta = store.insert(key.as_str().to_string(), Arc::clone(&resource));

    if let Err(err) = counters.adjust_storage(delta.net()).await {
        warn!(
            target = "yacdn::cache",
            key = %key,
            error = %err,
            delta = delta.net(),
            "failed to record storage usage change"
        );
    }

    debug!(
        target = "yacdn::cache",
        key = %key,
        bytes = resource.content_length(),
        fetch_ms = fetch_duration.as_millis() as u64,
        "origin fetch stored"
    );

    Ok(resource)
}

fn build_resource(
    key: &CacheKey,
    response: OriginResponse,
    fetch_duration: Duration,
) -> CachedResource {
    let content_type = response
        .content_type
        .filter(|value| !value.trim().is_empty())
        .or_else(|| {
            mime_guess::from_path(key.origin_url().path())
                .first()
                .map(|mime| mime.essence_str().to_string())
        })
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());

    CachedResource {
        url: key.as_str().to_string(),
        content_type,
        data: response.data,
        fetched_at: Instant::now(),
        fetch_duration,
    }
}
