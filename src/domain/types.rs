//! Shared domain enumerations.

use std::time::Duration;

/// Freshness window of `/serve/` when neither settings nor the caller override it.
pub const DEFAULT_SERVE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// How a content request treats the caller's query string and freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Long-lived cached copy; the query string is not part of the key.
    Serve,
    /// Pass-through; the query string is kept and every call refetches.
    Proxy,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Route::Serve => "serve",
            Route::Proxy => "proxy",
        }
    }

    pub fn path_prefix(self) -> &'static str {
        match self {
            Route::Serve => "/serve/",
            Route::Proxy => "/proxy/",
        }
    }

    /// Classify a request path by its prefix.
    pub fn classify(path: &str) -> Option<(Route, &str)> {
        [Route::Serve, Route::Proxy]
            .into_iter()
            .find_map(|route| path.strip_prefix(route.path_prefix()).map(|rest| (route, rest)))
    }

    pub fn keeps_query(self) -> bool {
        matches!(self, Route::Proxy)
    }

    /// Freshness window applied when the caller does not override it.
    pub fn default_max_age(self, serve_max_age: Duration) -> Duration {
        match self {
            Route::Serve => serve_max_age,
            Route::Proxy => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_strips_known_prefixes() {
        assert_eq!(
            Route::classify("/serve/https://example.com/a.js"),
            Some((Route::Serve, "https://example.com/a.js"))
        );
        assert_eq!(
            Route::classify("/proxy/example.com/api"),
            Some((Route::Proxy, "example.com/api"))
        );
        assert_eq!(Route::classify("/stats"), None);
    }

    #[test]
    fn proxy_default_max_age_is_zero() {
        let day = Duration::from_secs(86_400);
        assert_eq!(Route::Serve.default_max_age(day), day);
        assert_eq!(Route::Proxy.default_max_age(day), Duration::ZERO);
    }
}
