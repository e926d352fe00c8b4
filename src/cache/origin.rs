//! Origin fetch seam.

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::domain::error::OriginError;

/// Body and metadata of a successful origin response.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// Fetch `url`. Network failures, non-success statuses and timeouts are
    /// all reported as [`OriginError`].
    async fn fetch(&self, url: &Url) -> Result<OriginResponse, OriginError>;
}
