//! Failures raised while bringing the node's adapters up.

use std::fmt::Display;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to build the {client} http client: {message}")]
    HttpClient {
        client: &'static str,
        message: String,
    },
    #[error("key-value store at `{url}` is unreachable: {message}")]
    Store { url: String, message: String },
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl InfraError {
    pub fn http_client(client: &'static str, err: impl Display) -> Self {
        Self::HttpClient {
            client,
            message: err.to_string(),
        }
    }

    /// `url` should already be redacted.
    pub fn store(url: impl Into<String>, err: impl Display) -> Self {
        Self::Store {
            url: url.into(),
            message: err.to_string(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
