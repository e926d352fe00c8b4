//! Content request pipeline for `/serve/` and `/proxy/`.
//!
//! Ordering per request: hit counter, cache key, blacklist, popularity
//! leaderboard, cache retrieval, bytes served. Hits are counted before the
//! blacklist check unless `count_blocked_requests` is turned off.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::application::{
    blacklist::{Blacklist, referer_hostname},
    counters::UsageCounters,
};
use crate::cache::{CacheKey, CacheManager, RetrievalSource};
use crate::domain::{
    error::EdgeError,
    types::{DEFAULT_SERVE_MAX_AGE, Route},
};
use crate::util::bytes::{format_bit_rate, format_bytes};

const METRIC_BLACKLIST_REJECT: &str = "yacdn_blacklist_reject_total";

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Freshness window of `/serve/` when no `maxAge` is given.
    pub serve_max_age: Duration,
    pub count_blocked_requests: bool,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            serve_max_age: DEFAULT_SERVE_MAX_AGE,
            count_blocked_requests: true,
        }
    }
}

/// Transport-independent view of one content request.
#[derive(Debug, Clone)]
pub struct ContentRequest {
    pub route: Route,
    /// Everything after `/serve/` or `/proxy/`, undecoded.
    pub path_remainder: String,
    pub query: Option<String>,
    pub referer: Option<String>,
    /// Raw `maxAge` query parameter in seconds.
    pub max_age_param: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ContentResponse {
    pub content_type: String,
    pub content_length: u64,
    pub body: Bytes,
    pub source: RetrievalSource,
}

#[derive(Clone)]
pub struct EdgeService {
    config: EdgeConfig,
    cache: CacheManager,
    counters: UsageCounters,
    blacklist: Arc<Blacklist>,
}

impl EdgeService {
    pub fn new(
        config: EdgeConfig,
        cache: CacheManager,
        counters: UsageCounters,
        blacklist: Arc<Blacklist>,
    ) -> Self {
        Self {
            config,
            cache,
            counters,
            blacklist,
        }
    }

    pub fn counters(&self) -> &UsageCounters {
        &self.counters
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn is_blacklisted(&self, hostname: &str) -> bool {
        self.blacklist.is_blacklisted(hostname)
    }

    #[instrument(skip_all, fields(route = request.route.as_str()))]
    pub async fn handle(&self, request: ContentRequest) -> Result<ContentResponse, EdgeError> {
        let started_at = Instant::now();

        let early_hit = if self.config.count_blocked_requests {
            Some(self.counters.record_hit().await?)
        } else {
            None
        };

        let key = CacheKey::new(
            request.route,
            &request.path_remainder,
            request.query.as_deref(),
        )?;

        self.check_referer(&key, request.referer.as_deref())?;

        let n = match early_hit {
            Some(n) => n,
            None => self.counters.record_hit().await?,
        };
        self.counters.record_popularity(key.as_str()).await?;

        let max_age = self.resolve_max_age(request.route, request.max_age_param.as_deref())?;

        let retrieved = self.cache.retrieve(&key, max_age).await?;
        let content_length = retrieved.content_length();

        self.counters.record_bytes_served(content_length).await?;

        let elapsed = started_at.elapsed();
        info!(
            target = "yacdn::edge",
            n,
            url = %key,
            referer = request.referer.as_deref().unwrap_or(""),
            size = %format_bytes(content_length),
            elapsed_ms = elapsed.as_millis() as u64,
            speed = %format_bit_rate(content_length, elapsed),
            source = ?retrieved.source,
            "content served"
        );

        Ok(ContentResponse {
            content_type: retrieved.content_type().to_string(),
            content_length,
            body: retrieved.resource.data.clone(),
            source: retrieved.source,
        })
    }

    fn check_referer(&self, key: &CacheKey, referer: Option<&str>) -> Result<(), EdgeError> {
        let Some(hostname) = referer.and_then(referer_hostname) else {
            return Ok(());
        };
        if !self.blacklist.is_blacklisted(&hostname) {
            return Ok(());
        }

        counter!(METRIC_BLACKLIST_REJECT).increment(1);
        warn!(
            target = "yacdn::edge",
            url = %key,
            referer_host = %hostname,
            "referer on blacklist"
        );
        Err(EdgeError::blacklisted(hostname))
    }

    fn resolve_max_age(&self, route: Route, param: Option<&str>) -> Result<Duration, EdgeError> {
        match (route, param) {
            (Route::Serve, Some(raw)) => parse_max_age(raw),
            (route, _) => Ok(route.default_max_age(self.config.serve_max_age)),
        }
    }
}

/// Parse a `maxAge` value given in (possibly fractional) seconds.
///
/// An empty value means zero.
pub fn parse_max_age(raw: &str) -> Result<Duration, EdgeError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Duration::ZERO);
    }

    let seconds: f64 = raw
        .parse()
        .map_err(|_| EdgeError::invalid_request(format!("maxAge `{raw}` is not a number")))?;
    if seconds.is_sign_negative() {
        return Err(EdgeError::invalid_request(format!(
            "maxAge `{raw}` must not be negative"
        )));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|err| EdgeError::invalid_request(format!("maxAge `{raw}`: {err}")))
}
