//! Local and fleet-wide usage statistics.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use metrics::counter;
use tracing::{debug, warn};
use url::Url;
use yacdn_api_types::StatsReport;

use crate::application::counters::UsageCounters;
use crate::domain::{entities::Node, error::EdgeError};

const METRIC_PEER_ERROR: &str = "yacdn_peer_error_total";

/// Reads the raw counters a peer exposes on `GET /stats`.
#[async_trait]
pub trait PeerStatsClient: Send + Sync {
    /// Unreachable peers and malformed bodies fail with [`EdgeError::Aggregation`].
    async fn fetch_stats(&self, node: &Node) -> Result<StatsReport, EdgeError>;
}

#[derive(Clone)]
pub struct StatsAggregator {
    counters: UsageCounters,
    peers: Arc<dyn PeerStatsClient>,
    nodes: Arc<[Node]>,
    local_url: Option<String>,
}

impl StatsAggregator {
    /// `local_url` identifies this node in `nodes`; its counters are read
    /// from the store instead of over HTTP.
    pub fn new(
        counters: UsageCounters,
        peers: Arc<dyn PeerStatsClient>,
        nodes: Vec<Node>,
        local_url: Option<&Url>,
    ) -> Self {
        Self {
            counters,
            peers,
            nodes: nodes.into(),
            local_url: local_url.map(|url| url.as_str().trim_end_matches('/').to_string()),
        }
    }

    pub async fn local_stats(&self) -> Result<StatsReport, EdgeError> {
        Ok(self.counters.snapshot().await?)
    }

    /// Sum of every node's counters. A single failing peer fails the whole
    /// call; no partial totals are returned.
    ///
    /// Without a configured fleet the node reports its own counters.
    pub async fn global_stats(&self) -> Result<StatsReport, EdgeError> {
        if self.nodes.is_empty() {
            return self.local_stats().await;
        }

        let lookups = self.nodes.iter().map(|node| async move {
            if self.is_local(node) {
                return self.local_stats().await;
            }
            self.peers.fetch_stats(node).await.inspect_err(|err| {
                counter!(METRIC_PEER_ERROR).increment(1);
                warn!(
                    target = "yacdn::stats",
                    peer = %node.url,
                    error = %err,
                    "peer stats unavailable"
                );
            })
        });

        let reports = try_join_all(lookups).await?;
        let total = reports
            .into_iter()
            .fold(StatsReport::default(), StatsReport::merge);

        debug!(
            target = "yacdn::stats",
            nodes = self.nodes.len(),
            cdn_hits = total.cdn_hits,
            "aggregated fleet stats"
        );
        Ok(total)
    }

    fn is_local(&self, node: &Node) -> bool {
        self.local_url
            .as_deref()
            .is_some_and(|local| local == node.base_url())
    }
}
