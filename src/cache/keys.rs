//! Cache key normalization.
//!
//! A key is the request path remainder followed by `?` and, for proxied
//! requests only, the caller's query string. The same key is used for the
//! popularity leaderboard, so its layout must not change between releases.

use std::fmt;

use url::Url;

use crate::domain::{error::EdgeError, types::Route};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key: String,
    origin: Url,
}

impl CacheKey {
    /// Build the key for a request and resolve the origin URL behind it.
    ///
    /// A bare trailing `?` is not sent to the origin and a scheme-less target
    /// defaults to `https://`.
    pub fn new(route: Route, remainder: &str, query: Option<&str>) -> Result<Self, EdgeError> {
        let remainder = remainder.trim();
        if remainder.is_empty() {
            return Err(EdgeError::invalid_request("missing target URL"));
        }

        let query = if route.keeps_query() {
            query.unwrap_or("")
        } else {
            ""
        };

        let key = format!("{remainder}?{query}");
        let origin = resolve_origin(&key)?;
        Ok(Self { key, origin })
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn origin_url(&self) -> &Url {
        &self.origin
    }
}

fn resolve_origin(key: &str) -> Result<Url, EdgeError> {
    let target = key.strip_suffix('?').unwrap_or(key);
    let candidate = if has_scheme(target) {
        target.to_string()
    } else {
        format!("https://{}", target.trim_start_matches('/'))
    };

    let url = Url::parse(&candidate)
        .map_err(|err| EdgeError::invalid_request(format!("invalid target `{target}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(EdgeError::invalid_request(format!(
            "unsupported scheme `{other}`"
        ))),
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn has_scheme(target: &str) -> bool {
    target.split_once("://").is_some_and(|(scheme, _)| {
        !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_key_drops_query() {
        let key = CacheKey::new(Route::Serve, "https://example.com/a.js", Some("v=2&maxAge=10"))
            .expect("key");
        assert_eq!(key.as_str(), "https://example.com/a.js?");
    }

    #[test]
    fn proxy_key_keeps_query() {
        let key = CacheKey::new(Route::Proxy, "https://example.com/api", Some("page=2"))
            .expect("key");
        assert_eq!(key.as_str(), "https://example.com/api?page=2");

        let bare = CacheKey::new(Route::Proxy, "https://example.com/api", None).expect("key");
        assert_eq!(bare.as_str(), "https://example.com/api?");
    }

    #[test]
    fn empty_remainder_is_rejected() {
        let err = CacheKey::new(Route::Serve, "  ", None).expect_err("empty");
        assert!(matches!(err, EdgeError::InvalidRequest(_)));
    }

    #[test]
    fn origin_url_strips_bare_question_mark_and_defaults_scheme() {
        let key = CacheKey::new(Route::Serve, "cdn.example.com/lib.js", None).expect("key");
        assert_eq!(
            key.origin_url().as_str(),
            "https://cdn.example.com/lib.js"
        );

        let proxied = CacheKey::new(Route::Proxy, "http://example.com/q", Some("a=1"))
            .expect("key");
        assert_eq!(
            proxied.origin_url().as_str(),
            "http://example.com/q?a=1"
        );
    }

    #[test]
    fn origin_url_rejects_non_http_schemes() {
        let err = CacheKey::new(Route::Serve, "ftp://example.com/file", None).expect_err("ftp");
        assert!(matches!(err, EdgeError::InvalidRequest(_)));
    }
}
