//! Wire types exchanged between yacdn edge nodes and their clients.
//!
//! `StatsReport` is the body of `GET /stats` on every node and is what the
//! fleet aggregator expects back from its peers, so field names must stay
//! stable across releases.

use serde::{Deserialize, Serialize};

/// Raw per-node usage counters as served by `GET /stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub cdn_hits: u64,
    pub cdn_data: u64,
    pub cache_storage_usage: u64,
}

impl StatsReport {
    /// Field-wise saturating sum of two reports.
    pub fn merge(self, other: StatsReport) -> StatsReport {
        StatsReport {
            cdn_hits: self.cdn_hits.saturating_add(other.cdn_hits),
            cdn_data: self.cdn_data.saturating_add(other.cdn_data),
            cache_storage_usage: self
                .cache_storage_usage
                .saturating_add(other.cache_storage_usage),
        }
    }
}

/// Fleet-wide totals as rendered by `GET /global-stats`.
///
/// Byte quantities are pre-formatted for humans; the raw numbers live in
/// [`StatsReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatsReport {
    pub cdn_hits: u64,
    pub cdn_data: String,
    pub cache_storage_usage: String,
}

/// One entry of the `GET /nodes` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDistance {
    pub url: String,
    /// Great-circle distance from the requester in kilometres.
    pub distance: f64,
}

/// One entry of the `GET /top` popularity leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularUrl {
    pub url: String,
    pub hits: u64,
}
