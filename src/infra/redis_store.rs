//! Redis-backed key-value store.
//!
//! Lets counters, the popularity leaderboard and the node index outlive a
//! restart and be shared by processes fronting the same node. Every trait
//! method is a single command, so atomicity is whatever Redis gives that
//! command.

use async_trait::async_trait;
use redis::{Client, Cmd, FromRedisValue, RedisError, aio::ConnectionManager};
use tracing::info;
use url::Url;

use super::error::InfraError;
use crate::application::repos::{GeoMatch, GeoRadiusQuery, KeyValueStore};
use crate::config::redacted_url;
use crate::domain::{entities::Coordinates, error::StoreError};

/// Half the equatorial circumference; no two points on earth are further apart.
const WHOLE_EARTH_RADIUS_KM: f64 = 20_038.0;

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connect eagerly so a bad URL or an unreachable server fails startup
    /// instead of the first request.
    pub async fn connect(url: &Url) -> Result<Self, InfraError> {
        let redacted = redacted_url(url);
        let client =
            Client::open(url.as_str()).map_err(|err| InfraError::store(redacted.clone(), err))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|err| InfraError::store(redacted.clone(), err))?;
        info!(target = "yacdn::store", url = %redacted, "connected to redis");
        Ok(Self { connection })
    }

    async fn query<T: FromRedisValue>(&self, key: &str, cmd: Cmd) -> Result<T, StoreError> {
        // ConnectionManager clones share one multiplexed connection.
        let mut connection = self.connection.clone();
        cmd.query_async(&mut connection)
            .await
            .map_err(|err| store_error(key, &err))
    }
}

fn store_error(key: &str, err: &RedisError) -> StoreError {
    if err.code() == Some("WRONGTYPE") {
        return StoreError::wrong_type(key);
    }
    let message = err.to_string();
    if message.contains("overflow") {
        return StoreError::Overflow {
            key: key.to_string(),
        };
    }
    StoreError::Unavailable(message)
}

fn incr_by_cmd(key: &str, delta: i64) -> Cmd {
    let mut cmd = redis::cmd("INCRBY");
    cmd.arg(key).arg(delta);
    cmd
}

fn get_cmd(key: &str) -> Cmd {
    let mut cmd = redis::cmd("GET");
    cmd.arg(key);
    cmd
}

fn zincr_by_cmd(key: &str, delta: u64, member: &str) -> Cmd {
    let mut cmd = redis::cmd("ZINCRBY");
    cmd.arg(key).arg(delta).arg(member);
    cmd
}

/// `None` when nothing can be returned; `ZREVRANGE key 0 -1` would mean "all".
fn top_cmd(key: &str, limit: usize) -> Option<Cmd> {
    let stop = limit.checked_sub(1)?;
    let mut cmd = redis::cmd("ZREVRANGE");
    cmd.arg(key).arg(0).arg(stop).arg("WITHSCORES");
    Some(cmd)
}

fn geo_add_cmd(key: &str, coordinates: Coordinates, member: &str) -> Cmd {
    let mut cmd = redis::cmd("GEOADD");
    cmd.arg(key)
        .arg(coordinates.longitude)
        .arg(coordinates.latitude)
        .arg(member);
    cmd
}

/// `None` for a zero count, which Redis rejects.
fn geo_radius_cmd(key: &str, query: GeoRadiusQuery) -> Option<Cmd> {
    if query.count == Some(0) {
        return None;
    }
    let mut cmd = redis::cmd("GEORADIUS");
    cmd.arg(key)
        .arg(query.center.longitude)
        .arg(query.center.latitude)
        .arg(query.radius_km.unwrap_or(WHOLE_EARTH_RADIUS_KM))
        .arg("km")
        .arg("WITHDIST");
    if let Some(count) = query.count {
        cmd.arg("COUNT").arg(count);
    }
    cmd.arg("ASC");
    Some(cmd)
}

/// Sorted-set scores come back as floats; the leaderboard only ever adds
/// whole positive amounts.
fn score_to_count(score: f64) -> u64 {
    if score.is_finite() && score > 0.0 {
        score as u64
    } else {
        0
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.query(key, incr_by_cmd(key, delta)).await
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.query(key, get_cmd(key)).await
    }

    async fn zincr_by(&self, key: &str, delta: u64, member: &str) -> Result<u64, StoreError> {
        let score: f64 = self.query(key, zincr_by_cmd(key, delta, member)).await?;
        Ok(score_to_count(score))
    }

    async fn zrange_desc(&self, key: &str, limit: usize) -> Result<Vec<(String, u64)>, StoreError> {
        let Some(cmd) = top_cmd(key, limit) else {
            return Ok(Vec::new());
        };
        let entries: Vec<(String, f64)> = self.query(key, cmd).await?;
        Ok(entries
            .into_iter()
            .map(|(member, score)| (member, score_to_count(score)))
            .collect())
    }

    async fn geo_add(
        &self,
        key: &str,
        coordinates: Coordinates,
        member: &str,
    ) -> Result<bool, StoreError> {
        coordinates
            .validate()
            .map_err(|reason| StoreError::Unavailable(format!("invalid coordinates: {reason}")))?;
        let added: i64 = self
            .query(key, geo_add_cmd(key, coordinates, member))
            .await?;
        Ok(added == 1)
    }

    async fn geo_radius(
        &self,
        key: &str,
        query: GeoRadiusQuery,
    ) -> Result<Vec<GeoMatch>, StoreError> {
        let Some(cmd) = geo_radius_cmd(key, query) else {
            return Ok(Vec::new());
        };
        let found: Vec<(String, f64)> = self.query(key, cmd).await?;
        Ok(found
            .into_iter()
            .map(|(member, distance_km)| GeoMatch {
                member,
                distance_km,
            })
            .collect())
    }
}
