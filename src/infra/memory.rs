//! In-process key-value store.
//!
//! Backs a single node (or a test) with the same primitives the edge services
//! expect from an external store. Counters are updated under the per-key
//! shard lock, so increments are atomic with respect to each other.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::application::repos::{GeoMatch, GeoRadiusQuery, KeyValueStore};
use crate::domain::{entities::Coordinates, error::StoreError};

#[derive(Debug, Clone)]
struct GeoMember {
    member: String,
    coordinates: Coordinates,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, i64>,
    sorted_sets: DashMap<String, HashMap<String, u64>>,
    geo_sets: DashMap<String, Vec<GeoMember>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_counter_key(&self, key: &str) -> Result<(), StoreError> {
        if self.sorted_sets.contains_key(key) || self.geo_sets.contains_key(key) {
            return Err(StoreError::wrong_type(key));
        }
        Ok(())
    }

    fn ensure_sorted_set_key(&self, key: &str) -> Result<(), StoreError> {
        if self.counters.contains_key(key) || self.geo_sets.contains_key(key) {
            return Err(StoreError::wrong_type(key));
        }
        Ok(())
    }

    fn ensure_geo_key(&self, key: &str) -> Result<(), StoreError> {
        if self.counters.contains_key(key) || self.sorted_sets.contains_key(key) {
            return Err(StoreError::wrong_type(key));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.ensure_counter_key(key)?;
        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        let next = entry
            .checked_add(delta)
            .ok_or_else(|| StoreError::Overflow {
                key: key.to_string(),
            })?;
        *entry = next;
        Ok(next)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.ensure_counter_key(key)?;
        Ok(self.counters.get(key).map(|value| *value))
    }

    async fn zincr_by(&self, key: &str, delta: u64, member: &str) -> Result<u64, StoreError> {
        self.ensure_sorted_set_key(key)?;
        let mut set = self.sorted_sets.entry(key.to_string()).or_default();
        let score = set.entry(member.to_string()).or_insert(0);
        *score = score.saturating_add(delta);
        Ok(*score)
    }

    async fn zrange_desc(&self, key: &str, limit: usize) -> Result<Vec<(String, u64)>, StoreError> {
        self.ensure_sorted_set_key(key)?;
        let Some(set) = self.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<(String, u64)> = set
            .iter()
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        drop(set);

        entries.sort_by(|(a_member, a_score), (b_member, b_score)| {
            b_score.cmp(a_score).then_with(|| a_member.cmp(b_member))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    async fn geo_add(
        &self,
        key: &str,
        coordinates: Coordinates,
        member: &str,
    ) -> Result<bool, StoreError> {
        self.ensure_geo_key(key)?;
        coordinates
            .validate()
            .map_err(|reason| StoreError::Unavailable(format!("invalid coordinates: {reason}")))?;

        let mut set = self.geo_sets.entry(key.to_string()).or_default();
        if let Some(existing) = set.iter_mut().find(|entry| entry.member == member) {
            existing.coordinates = coordinates;
            return Ok(false);
        }
        set.push(GeoMember {
            member: member.to_string(),
            coordinates,
        });
        Ok(true)
    }

    async fn geo_radius(
        &self,
        key: &str,
        query: GeoRadiusQuery,
    ) -> Result<Vec<GeoMatch>, StoreError> {
        self.ensure_geo_key(key)?;
        let Some(set) = self.geo_sets.get(key) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<GeoMatch> = set
            .iter()
            .map(|entry| GeoMatch {
                member: entry.member.clone(),
                distance_km: query.center.distance_km(&entry.coordinates),
            })
            .filter(|found| {
                query
                    .radius_km
                    .is_none_or(|radius| found.distance_km <= radius)
            })
            .collect();
        drop(set);

        // `sort_by` is stable, so equal distances keep insertion order.
        matches.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        if let Some(count) = query.count {
            matches.truncate(count);
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_by_is_signed_and_returns_new_value() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("hits").await.expect("incr"), 1);
        assert_eq!(store.incr_by("hits", 9).await.expect("incr"), 10);
        assert_eq!(store.incr_by("hits", -4).await.expect("incr"), 6);
        assert_eq!(store.get("hits").await.expect("get"), Some(6));
        assert_eq!(store.get("missing").await.expect("get"), None);
    }

    #[tokio::test]
    async fn incr_by_reports_overflow() {
        let store = MemoryStore::new();
        store.incr_by("big", i64::MAX).await.expect("incr");
        let err = store.incr("big").await.expect_err("overflow");
        assert!(matches!(err, StoreError::Overflow { .. }));
        assert_eq!(store.get("big").await.expect("get"), Some(i64::MAX));
    }

    #[tokio::test]
    async fn mixing_types_on_one_key_is_rejected() {
        let store = MemoryStore::new();
        store.zincr_by("urls", 1, "a").await.expect("zincr");
        let err = store.incr("urls").await.expect_err("wrong type");
        assert_eq!(err, StoreError::wrong_type("urls"));
    }

    #[tokio::test]
    async fn geo_radius_orders_by_distance_and_limits() {
        let store = MemoryStore::new();
        let origin = Coordinates::new(0.0, 0.0);
        // One degree of latitude is ~111 km.
        for (member, latitude) in [("far", 0.45), ("near", 0.09), ("mid", 0.27)] {
            store
                .geo_add("nodes", Coordinates::new(0.0, latitude), member)
                .await
                .expect("geo_add");
        }

        let found = store
            .geo_radius("nodes", GeoRadiusQuery::unbounded(origin).with_count(2))
            .await
            .expect("radius");
        let members: Vec<&str> = found.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(members, vec!["near", "mid"]);
        assert!(found[0].distance_km < found[1].distance_km);

        let bounded = store
            .geo_radius("nodes", GeoRadiusQuery::unbounded(origin).with_radius_km(20.0))
            .await
            .expect("radius");
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[0].member, "near");
    }

    #[tokio::test]
    async fn geo_ties_keep_insertion_order_and_readd_moves_member() {
        let store = MemoryStore::new();
        let center = Coordinates::new(10.0, 10.0);
        for member in ["first", "second", "third"] {
            store
                .geo_add("nodes", Coordinates::new(10.0, 11.0), member)
                .await
                .expect("geo_add");
        }

        let found = store
            .geo_radius("nodes", GeoRadiusQuery::unbounded(center))
            .await
            .expect("radius");
        let members: Vec<&str> = found.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(members, vec!["first", "second", "third"]);

        let added = store
            .geo_add("nodes", center, "third")
            .await
            .expect("geo_add");
        assert!(!added);
        let found = store
            .geo_radius("nodes", GeoRadiusQuery::unbounded(center).with_count(1))
            .await
            .expect("radius");
        assert_eq!(found[0].member, "third");
        assert_eq!(found[0].distance_km, 0.0);
    }
}
