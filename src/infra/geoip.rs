//! Client geolocation via the ipstack HTTP API.

use std::net::IpAddr;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::application::geo::GeoLookup;
use crate::config::GeoSettings;
use crate::domain::{entities::Coordinates, error::EdgeError};

use super::error::InfraError;

#[derive(Debug, Deserialize)]
struct IpstackResponse {
    longitude: Option<f64>,
    latitude: Option<f64>,
    error: Option<IpstackFailure>,
}

#[derive(Debug, Deserialize)]
struct IpstackFailure {
    info: Option<String>,
}

#[derive(Clone, Debug)]
pub struct IpstackLookup {
    client: Client,
    base_url: Url,
    access_key: Option<String>,
}

impl IpstackLookup {
    pub fn new(settings: &GeoSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::http_client("geolocation", err))?;
        Ok(Self {
            client,
            base_url: settings.ipstack_url.clone(),
            access_key: settings.ipstack_key.clone(),
        })
    }

    fn lookup_url(&self, ip: IpAddr, access_key: &str) -> Result<Url, EdgeError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| EdgeError::geolocation("ipstack url cannot be a base"))?
            .pop_if_empty()
            .push(&ip.to_string());
        url.query_pairs_mut().append_pair("access_key", access_key);
        Ok(url)
    }
}

#[async_trait]
impl GeoLookup for IpstackLookup {
    async fn locate(&self, ip: IpAddr) -> Result<Coordinates, EdgeError> {
        let access_key = self
            .access_key
            .as_deref()
            .ok_or_else(|| EdgeError::geolocation("ipstack access key is not configured"))?;
        let url = self.lookup_url(ip, access_key)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| EdgeError::geolocation(format!("lookup for {ip}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EdgeError::geolocation(format!(
                "lookup for {ip} answered with status {status}"
            )));
        }

        let body: IpstackResponse = response
            .json()
            .await
            .map_err(|err| EdgeError::geolocation(format!("lookup for {ip}: {err}")))?;

        if let Some(failure) = body.error {
            return Err(EdgeError::geolocation(format!(
                "lookup for {ip} rejected: {}",
                failure.info.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        match (body.longitude, body.latitude) {
            (Some(longitude), Some(latitude)) => Ok(Coordinates::new(longitude, latitude)),
            _ => Err(EdgeError::geolocation(format!("no location known for {ip}"))),
        }
    }
}
