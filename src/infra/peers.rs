//! Peer `GET /stats` client.

use async_trait::async_trait;
use reqwest::Client;
use yacdn_api_types::StatsReport;

use crate::application::stats::PeerStatsClient;
use crate::config::PeerSettings;
use crate::domain::{entities::Node, error::EdgeError};

use super::error::InfraError;

#[derive(Clone, Debug)]
pub struct HttpPeerStatsClient {
    client: Client,
}

impl HttpPeerStatsClient {
    pub fn new(settings: &PeerSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("yacdn/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::http_client("peer", err))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PeerStatsClient for HttpPeerStatsClient {
    async fn fetch_stats(&self, node: &Node) -> Result<StatsReport, EdgeError> {
        let url = format!("{}/stats", node.base_url());

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|err| EdgeError::aggregation(format!("{url}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EdgeError::aggregation(format!(
                "{url}: answered with status {status}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| EdgeError::aggregation(format!("{url}: {err}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|err| EdgeError::aggregation(format!("{url}: malformed stats: {err}")))
    }
}
