use thiserror::Error;

/// Failure of a single origin fetch.
///
/// `Clone` because one in-flight fetch reports its outcome to every caller
/// that coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OriginError {
    #[error("origin request to `{url}` failed: {message}")]
    Network { url: String, message: String },
    #[error("origin `{url}` answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("origin request to `{url}` timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("origin body for `{url}` exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },
    #[error("origin fetch for `{url}` ended without a result")]
    Abandoned { url: String },
}

impl OriginError {
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn abandoned(url: impl Into<String>) -> Self {
        Self::Abandoned { url: url.into() }
    }
}

/// Failure reported by the key-value store collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("key `{key}` holds a value of another type")]
    WrongType { key: String },
    #[error("counter `{key}` would overflow")]
    Overflow { key: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn wrong_type(key: impl Into<String>) -> Self {
        Self::WrongType { key: key.into() }
    }
}

/// Per-request failure taxonomy of the edge node.
///
/// Every variant is terminal for the request that raised it; none is retried
/// by the node itself.
#[derive(Debug, Error)]
pub enum EdgeError {
    #[error(transparent)]
    Origin(#[from] OriginError),
    #[error("referer host `{hostname}` is blacklisted")]
    Blacklisted { hostname: String },
    #[error("client location could not be resolved: {0}")]
    Geolocation(String),
    #[error("fleet stats aggregation failed: {0}")]
    Aggregation(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EdgeError {
    pub fn blacklisted(hostname: impl Into<String>) -> Self {
        Self::Blacklisted {
            hostname: hostname.into(),
        }
    }

    pub fn geolocation(message: impl Into<String>) -> Self {
        Self::Geolocation(message.into())
    }

    pub fn aggregation(message: impl Into<String>) -> Self {
        Self::Aggregation(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}
