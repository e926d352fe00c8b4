//! Static referer denylist.

use std::{collections::HashSet, path::Path};

use url::Url;

/// Immutable set of denied referer hostnames, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    hosts: HashSet<String>,
}

impl Blacklist {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .filter_map(|host| normalize(host.as_ref()))
            .collect();
        Self { hosts }
    }

    /// Parse a newline-delimited hostname list. Blank lines are skipped.
    pub fn from_lines(contents: &str) -> Self {
        Self::new(contents.lines())
    }

    /// Read a hostname list from disk and merge it with `extra` hosts.
    pub async fn load(path: Option<&Path>, extra: &[String]) -> Result<Self, std::io::Error> {
        let mut blacklist = Self::new(extra);
        if let Some(path) = path {
            let contents = tokio::fs::read_to_string(path).await?;
            blacklist.hosts.extend(Self::from_lines(&contents).hosts);
        }
        Ok(blacklist)
    }

    pub fn is_blacklisted(&self, hostname: &str) -> bool {
        normalize(hostname).is_some_and(|host| self.hosts.contains(&host))
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Hostname of a `Referer` header value, or `None` when it is not an absolute URL.
pub fn referer_hostname(referer: &str) -> Option<String> {
    let url = Url::parse(referer.trim()).ok()?;
    url.host_str().map(str::to_string)
}

fn normalize(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('.');
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}
