//! Geo-proximity node selection.

use std::{net::IpAddr, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use yacdn_api_types::NodeDistance;

use crate::application::repos::{GeoRadiusQuery, KeyValueStore};
use crate::domain::{
    entities::{Coordinates, Node},
    error::{EdgeError, StoreError},
};

pub const NODES_KEY: &str = "nodes";

/// Resolves a client address to coordinates.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Fails with [`EdgeError::Geolocation`] instead of guessing a location.
    async fn locate(&self, ip: IpAddr) -> Result<Coordinates, EdgeError>;
}

#[derive(Clone)]
pub struct GeoLocator {
    store: Arc<dyn KeyValueStore>,
    lookup: Arc<dyn GeoLookup>,
    default_k: usize,
}

impl GeoLocator {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        lookup: Arc<dyn GeoLookup>,
        default_k: usize,
    ) -> Self {
        Self {
            store,
            lookup,
            default_k,
        }
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Write the static node list into the geospatial index.
    pub async fn register_nodes(&self, nodes: &[Node]) -> Result<usize, StoreError> {
        let mut added = 0;
        for node in nodes {
            if self
                .store
                .geo_add(NODES_KEY, node.coordinates(), &node.url)
                .await?
            {
                added += 1;
            }
        }
        info!(
            target = "yacdn::geo",
            nodes = nodes.len(),
            added,
            "registered fleet nodes"
        );
        Ok(added)
    }

    /// Up to `k` nodes ordered by ascending distance from `center`.
    #[instrument(skip(self))]
    pub async fn nearest(
        &self,
        center: Coordinates,
        k: Option<usize>,
    ) -> Result<Vec<NodeDistance>, EdgeError> {
        let k = k.unwrap_or(self.default_k);
        if k == 0 {
            return Ok(Vec::new());
        }
        center.validate().map_err(EdgeError::invalid_request)?;

        let matches = self
            .store
            .geo_radius(NODES_KEY, GeoRadiusQuery::unbounded(center).with_count(k))
            .await?;

        Ok(matches
            .into_iter()
            .map(|found| NodeDistance {
                url: found.member,
                distance: found.distance_km,
            })
            .collect())
    }

    /// Locate the client and rank nodes by distance from it.
    pub async fn nearest_to_client(
        &self,
        ip: IpAddr,
        k: Option<usize>,
    ) -> Result<Vec<NodeDistance>, EdgeError> {
        let center = self.lookup.locate(ip).await?;
        center
            .validate()
            .map_err(|reason| EdgeError::geolocation(format!("lookup for {ip}: {reason}")))?;
        debug!(
            target = "yacdn::geo",
            %ip,
            longitude = center.longitude,
            latitude = center.latitude,
            "client located"
        );
        self.nearest(center, k).await
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use super::*;
    use crate::infra::memory::MemoryStore;

    struct FixedLookup(Option<Coordinates>);

    #[async_trait]
    impl GeoLookup for FixedLookup {
        async fn locate(&self, ip: IpAddr) -> Result<Coordinates, EdgeError> {
            self.0
                .ok_or_else(|| EdgeError::geolocation(format!("no location for {ip}")))
        }
    }

    /// Longitude on the equator that lies `km` east of (0, 0).
    fn east_of_origin(km: f64) -> f64 {
        km / (6371.0 * PI / 180.0)
    }

    fn node(url: &str, km: f64) -> Node {
        Node {
            url: url.to_string(),
            longitude: east_of_origin(km),
            latitude: 0.0,
        }
    }

    fn locator(lookup: Option<Coordinates>) -> GeoLocator {
        GeoLocator::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FixedLookup(lookup)),
            5,
        )
    }

    #[tokio::test]
    async fn nearest_orders_by_distance_and_truncates() {
        let geo = locator(None);
        let added = geo
            .register_nodes(&[
                node("https://ten.example", 10.0),
                node("https://fifty.example", 50.0),
                node("https://five.example", 5.0),
                node("https://thirty.example", 30.0),
            ])
            .await
            .expect("register");
        assert_eq!(added, 4);

        let ranked = geo
            .nearest(Coordinates::new(0.0, 0.0), Some(3))
            .await
            .expect("nearest");
        let urls: Vec<_> = ranked.iter().map(|node| node.url.as_str()).collect();
        assert_eq!(
            urls,
            ["https://five.example", "https://ten.example", "https://thirty.example"]
        );
        assert!((ranked[0].distance - 5.0).abs() < 1e-6);
        assert!((ranked[2].distance - 30.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn nearest_returns_everything_when_k_exceeds_fleet() {
        let geo = locator(None);
        geo.register_nodes(&[node("https://a.example", 1.0), node("https://b.example", 2.0)])
            .await
            .expect("register");

        let ranked = geo
            .nearest(Coordinates::new(0.0, 0.0), None)
            .await
            .expect("nearest");
        assert_eq!(ranked.len(), 2);

        let none = geo
            .nearest(Coordinates::new(0.0, 0.0), Some(0))
            .await
            .expect("k = 0");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn equal_distances_keep_registration_order() {
        let geo = locator(None);
        geo.register_nodes(&[
            node("https://second.example", 7.0),
            Node {
                url: "https://first.example".to_string(),
                longitude: -east_of_origin(7.0),
                latitude: 0.0,
            },
        ])
        .await
        .expect("register");

        let ranked = geo
            .nearest(Coordinates::new(0.0, 0.0), Some(2))
            .await
            .expect("nearest");
        assert_eq!(ranked[0].url, "https://second.example");
        assert_eq!(ranked[1].url, "https://first.example");
    }

    #[tokio::test]
    async fn failed_lookup_is_a_geolocation_error() {
        let geo = locator(None);
        let err = geo
            .nearest_to_client("203.0.113.9".parse().expect("ip"), None)
            .await
            .expect_err("lookup failure");
        assert!(matches!(err, EdgeError::Geolocation(_)));
    }

    #[tokio::test]
    async fn client_location_feeds_the_ranking() {
        let geo = locator(Some(Coordinates::new(east_of_origin(49.0), 0.0)));
        geo.register_nodes(&[node("https://ten.example", 10.0), node("https://fifty.example", 50.0)])
            .await
            .expect("register");

        let ranked = geo
            .nearest_to_client("203.0.113.9".parse().expect("ip"), Some(1))
            .await
            .expect("nearest");
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].url, "https://fifty.example");
    }
}
