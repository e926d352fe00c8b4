//! Domain entities shared by the cache, geo and stats services.

use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tokio::time::Instant;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A fully fetched origin response held by the cache.
///
/// Entries are replaced whole on refetch and never mutated in place.
#[derive(Debug, Clone)]
pub struct CachedResource {
    pub url: String,
    pub content_type: String,
    pub data: Bytes,
    pub fetched_at: Instant,
    pub fetch_duration: Duration,
}

impl CachedResource {
    pub fn content_length(&self) -> u64 {
        self.data.len() as u64
    }

    /// `max_age` of zero is never fresh, which forces a refetch.
    pub fn is_fresh(&self, max_age: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < max_age
    }
}

/// Longitude/latitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinates {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Reject values outside the valid degree ranges.
    pub fn validate(&self) -> Result<(), String> {
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(format!("longitude {} out of range", self.longitude));
        }
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("latitude {} out of range", self.latitude));
        }
        Ok(())
    }

    /// Great-circle distance in kilometres on a spherical earth (haversine).
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_RADIUS_KM * c
    }
}

/// A fleet member, identified by its base URL.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Node {
    pub url: String,
    pub longitude: f64,
    pub latitude: f64,
}

impl Node {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.longitude, self.latitude)
    }

    /// Base URL without a trailing slash, so `{url}/stats` joins cleanly.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_max_age_is_never_fresh() {
        let now = Instant::now();
        let resource = CachedResource {
            url: "https://example.com/a.js?".to_string(),
            content_type: "text/javascript".to_string(),
            data: Bytes::from_static(b"alert(1)"),
            fetched_at: now,
            fetch_duration: Duration::from_millis(3),
        };

        assert!(!resource.is_fresh(Duration::ZERO, now));
        assert!(resource.is_fresh(Duration::from_secs(1), now));
        assert!(!resource.is_fresh(Duration::from_secs(1), now + Duration::from_secs(1)));
        assert_eq!(resource.content_length(), 8);
    }

    #[test]
    fn haversine_matches_known_city_distance() {
        // Paris -> London is roughly 344 km.
        let paris = Coordinates::new(2.3522, 48.8566);
        let london = Coordinates::new(-0.1276, 51.5072);
        let distance = paris.distance_km(&london);
        assert!((distance - 344.0).abs() < 5.0, "got {distance}");
        assert_eq!(paris.distance_km(&paris), 0.0);
    }

    #[test]
    fn coordinates_validation_rejects_out_of_range() {
        assert!(Coordinates::new(181.0, 0.0).validate().is_err());
        assert!(Coordinates::new(0.0, -91.0).validate().is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).validate().is_err());
        assert!(Coordinates::new(-122.4, 37.8).validate().is_ok());
    }

    #[test]
    fn node_base_url_trims_trailing_slash() {
        let node = Node {
            url: "https://eu.yacdn.example/".to_string(),
            longitude: 0.0,
            latitude: 0.0,
        };
        assert_eq!(node.base_url(), "https://eu.yacdn.example");
    }
}
