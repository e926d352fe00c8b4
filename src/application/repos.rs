//! Repository traits describing persistence adapters.
//!
//! The edge node keeps its counters, popularity leaderboard and node index in
//! an external key-value store. Only the primitives below are relied upon, so
//! any store offering atomic increments, sorted sets and a geospatial index can
//! back a node.

use async_trait::async_trait;

use crate::domain::{entities::Coordinates, error::StoreError};

/// Radius query against a geospatial set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoRadiusQuery {
    pub center: Coordinates,
    /// `None` searches without a distance bound.
    pub radius_km: Option<f64>,
    /// `None` returns every match.
    pub count: Option<usize>,
}

impl GeoRadiusQuery {
    pub fn unbounded(center: Coordinates) -> Self {
        Self {
            center,
            radius_km: None,
            count: None,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_radius_km(mut self, radius_km: f64) -> Self {
        self.radius_km = Some(radius_km);
        self
    }
}

/// One member returned by a radius query.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMatch {
    pub member: String,
    pub distance_km: f64,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Atomically add one to an integer counter, returning the new value.
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.incr_by(key, 1).await
    }

    /// Atomically add `delta` (possibly negative) to an integer counter.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Read an integer counter; missing keys are `None`.
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Add `delta` to the score of `member` in a sorted set, creating it at zero.
    async fn zincr_by(&self, key: &str, delta: u64, member: &str) -> Result<u64, StoreError>;

    /// Highest-scored members first, at most `limit` of them.
    async fn zrange_desc(&self, key: &str, limit: usize) -> Result<Vec<(String, u64)>, StoreError>;

    /// Insert or move a member of a geospatial set. Returns true when the
    /// member was newly added.
    async fn geo_add(
        &self,
        key: &str,
        coordinates: Coordinates,
        member: &str,
    ) -> Result<bool, StoreError>;

    /// Members ordered by ascending distance from the query centre; equal
    /// distances keep insertion order.
    async fn geo_radius(
        &self,
        key: &str,
        query: GeoRadiusQuery,
    ) -> Result<Vec<GeoMatch>, StoreError>;
}
