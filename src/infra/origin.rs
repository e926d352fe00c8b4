//! Origin fetches over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{Client, header::CONTENT_TYPE};
use url::Url;

use crate::cache::{OriginFetcher, OriginResponse};
use crate::config::OriginSettings;
use crate::domain::error::OriginError;

use super::error::InfraError;

#[derive(Clone, Debug)]
pub struct HttpOriginFetcher {
    client: Client,
    timeout: Duration,
    max_body_bytes: u64,
}

impl HttpOriginFetcher {
    pub fn new(settings: &OriginSettings, max_body_bytes: u64) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::http_client("origin", err))?;
        Ok(Self {
            client,
            timeout: settings.timeout,
            max_body_bytes,
        })
    }

    fn map_error(&self, url: &Url, err: reqwest::Error) -> OriginError {
        if err.is_timeout() {
            OriginError::Timeout {
                url: url.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            OriginError::network(url.as_str(), err.to_string())
        }
    }

    fn too_large(&self, url: &Url) -> OriginError {
        OriginError::TooLarge {
            url: url.to_string(),
            limit: self.max_body_bytes,
        }
    }
}

#[async_trait]
impl OriginFetcher for HttpOriginFetcher {
    async fn fetch(&self, url: &Url) -> Result<OriginResponse, OriginError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| self.map_error(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OriginError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if response
            .content_length()
            .is_some_and(|length| length > self.max_body_bytes)
        {
            return Err(self.too_large(url));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| self.map_error(url, err))?
        {
            if (body.len() + chunk.len()) as u64 > self.max_body_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(OriginResponse {
            content_type,
            data: Bytes::from(body),
        })
    }
}
