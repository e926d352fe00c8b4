//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::domain::{
    entities::{Coordinates, Node},
    types::DEFAULT_SERVE_MAX_AGE,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "yacdn";
const ENV_PREFIX: &str = "YACDN";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_LANDING_URL: &str = "https://ovsoinc.github.io/yacdn.org";
const DEFAULT_SERVE_MAX_AGE_MS: u64 = DEFAULT_SERVE_MAX_AGE.as_millis() as u64;
const DEFAULT_CACHE_MAX_ENTRIES: u64 = 10_000;
const DEFAULT_CACHE_MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_ORIGIN_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_ORIGIN_USER_AGENT: &str = concat!("yacdn/", env!("CARGO_PKG_VERSION"));
const DEFAULT_PEER_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_IPSTACK_URL: &str = "http://api.ipstack.com";
const DEFAULT_GEO_K: u64 = 5;
const DEFAULT_GEO_TIMEOUT_MS: u64 = 5_000;

/// Command-line arguments for the yacdn binary.
#[derive(Debug, Parser)]
#[command(name = "yacdn", version, about = "yacdn edge node")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "YACDN_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the edge node HTTP service.
    Serve(Box<ServeArgs>),
    /// Validate the resolved configuration and print a summary.
    #[command(name = "check-config")]
    CheckConfig(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the newline-delimited blacklist file.
    #[arg(long = "blacklist-path", value_name = "PATH")]
    pub blacklist_path: Option<PathBuf>,

    /// Override the origin fetch timeout.
    #[arg(long = "origin-timeout-ms", value_name = "MILLIS")]
    pub origin_timeout_ms: Option<u64>,

    /// Override the default freshness window of `/serve/`.
    #[arg(long = "cache-serve-max-age-ms", value_name = "MILLIS")]
    pub cache_serve_max_age_ms: Option<u64>,

    /// Keep counters and the node index in Redis at this URL.
    #[arg(long = "store-url", value_name = "URL")]
    pub store_url: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub origin: OriginSettings,
    pub peers: PeerSettings,
    pub geo: GeoSettings,
    pub blacklist: BlacklistSettings,
    pub stats: StatsSettings,
    pub store: StoreSettings,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub landing_url: Url,
    /// This node's own entry in `nodes`, if it is part of the fleet.
    pub public_url: Option<Url>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub serve_max_age: Duration,
    pub max_entries: NonZeroUsize,
    pub max_body_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct PeerSettings {
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GeoSettings {
    pub ipstack_url: Url,
    pub ipstack_key: Option<String>,
    pub default_k: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct BlacklistSettings {
    pub path: Option<PathBuf>,
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StatsSettings {
    /// Count requests rejected by the blacklist towards `cdnhits`.
    pub count_blocked_requests: bool,
}

/// Where counters, the leaderboard and the node index are kept.
#[derive(Debug, Clone, Default)]
pub struct StoreSettings {
    /// `redis://` or `rediss://` URL; `None` keeps everything in process memory.
    pub url: Option<Url>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) | Some(Command::CheckConfig(args)) => {
            raw.apply_serve_overrides(&args.overrides)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    origin: RawOriginSettings,
    peers: RawPeerSettings,
    geo: RawGeoSettings,
    blacklist: RawBlacklistSettings,
    stats: RawStatsSettings,
    store: RawStoreSettings,
    nodes: Vec<RawNode>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.blacklist_path.as_ref() {
            self.blacklist.path = Some(path.clone());
        }
        if let Some(timeout) = overrides.origin_timeout_ms {
            self.origin.timeout_ms = Some(timeout);
        }
        if let Some(max_age) = overrides.cache_serve_max_age_ms {
            self.cache.serve_max_age_ms = Some(max_age);
        }
        if let Some(url) = overrides.store_url.as_ref() {
            self.store.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            origin,
            peers,
            geo,
            blacklist,
            stats,
            store,
            nodes,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            origin: build_origin_settings(origin)?,
            peers: build_peer_settings(peers)?,
            geo: build_geo_settings(geo)?,
            blacklist: build_blacklist_settings(blacklist),
            stats: StatsSettings {
                count_blocked_requests: stats.count_blocked_requests.unwrap_or(true),
            },
            store: build_store_settings(store)?,
            nodes: build_nodes(nodes)?,
        })
    }

    /// One-line-per-section summary used by `check-config`.
    pub fn summary(&self) -> Vec<String> {
        vec![
            format!(
                "server: listening on {} (graceful shutdown {}s)",
                self.server.addr,
                self.server.graceful_shutdown.as_secs()
            ),
            format!(
                "public url: {}",
                self.server
                    .public_url
                    .as_ref()
                    .map(Url::as_str)
                    .unwrap_or("<not part of the fleet>")
            ),
            format!(
                "logging: level={} format={:?}",
                self.logging.level, self.logging.format
            ),
            format!(
                "cache: serve max-age {}ms, {} entries, {} bytes per body",
                self.cache.serve_max_age.as_millis(),
                self.cache.max_entries,
                self.cache.max_body_bytes
            ),
            format!(
                "origin: timeout {}ms, user agent `{}`",
                self.origin.timeout.as_millis(),
                self.origin.user_agent
            ),
            format!(
                "geo: {} (key {}), default k={}",
                self.geo.ipstack_url,
                if self.geo.ipstack_key.is_some() {
                    "set"
                } else {
                    "missing"
                },
                self.geo.default_k
            ),
            format!(
                "blacklist: {} inline host(s), file {}",
                self.blacklist.hosts.len(),
                self.blacklist
                    .path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "<none>".to_string())
            ),
            format!(
                "store: {}",
                self.store
                    .url
                    .as_ref()
                    .map(redacted_url)
                    .unwrap_or_else(|| "in-memory (reset on restart)".to_string())
            ),
            format!("nodes: {}", self.nodes.len()),
        ]
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let landing_url = parse_url(
        server.landing_url.as_deref().unwrap_or(DEFAULT_LANDING_URL),
        "server.landing_url",
    )?;
    let public_url = non_empty(server.public_url)
        .map(|value| parse_url(&value, "server.public_url"))
        .transpose()?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        landing_url,
        public_url,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let serve_max_age =
        Duration::from_millis(cache.serve_max_age_ms.unwrap_or(DEFAULT_SERVE_MAX_AGE_MS));

    let max_entries_value = cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES);
    let max_entries = usize::try_from(max_entries_value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid(
                "cache.max_entries",
                "must be greater than zero and fit in usize",
            )
        })?;

    let max_body_bytes = NonZeroU64::new(
        cache
            .max_body_bytes
            .unwrap_or(DEFAULT_CACHE_MAX_BODY_BYTES),
    )
    .ok_or_else(|| LoadError::invalid("cache.max_body_bytes", "must be greater than zero"))?;

    Ok(CacheSettings {
        serve_max_age,
        max_entries,
        max_body_bytes,
    })
}

fn build_origin_settings(origin: RawOriginSettings) -> Result<OriginSettings, LoadError> {
    let timeout = non_zero_millis(
        origin.timeout_ms.unwrap_or(DEFAULT_ORIGIN_TIMEOUT_MS),
        "origin.timeout_ms",
    )?;
    let user_agent = non_empty(origin.user_agent)
        .unwrap_or_else(|| DEFAULT_ORIGIN_USER_AGENT.to_string());

    Ok(OriginSettings {
        timeout,
        user_agent,
    })
}

fn build_peer_settings(peers: RawPeerSettings) -> Result<PeerSettings, LoadError> {
    let timeout = non_zero_millis(
        peers.timeout_ms.unwrap_or(DEFAULT_PEER_TIMEOUT_MS),
        "peers.timeout_ms",
    )?;
    Ok(PeerSettings { timeout })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let Some(raw) = non_empty(store.url) else {
        return Ok(StoreSettings::default());
    };
    let url = Url::parse(&raw)
        .map_err(|err| LoadError::invalid("store.url", format!("invalid url: {err}")))?;
    match url.scheme() {
        "redis" | "rediss" => Ok(StoreSettings { url: Some(url) }),
        other => Err(LoadError::invalid(
            "store.url",
            format!("unsupported scheme `{other}`, expected redis or rediss"),
        )),
    }
}

/// `url` without its password, for logs and summaries.
pub fn redacted_url(url: &Url) -> String {
    let mut shown = url.clone();
    if shown.password().is_some() {
        let _ = shown.set_password(Some("***"));
    }
    shown.to_string()
}

fn build_geo_settings(geo: RawGeoSettings) -> Result<GeoSettings, LoadError> {
    let ipstack_url = parse_url(
        geo.ipstack_url.as_deref().unwrap_or(DEFAULT_IPSTACK_URL),
        "geo.ipstack_url",
    )?;
    let ipstack_key = non_empty(geo.ipstack_key);
    let default_k = usize::try_from(geo.default_k.unwrap_or(DEFAULT_GEO_K))
        .map_err(|_| LoadError::invalid("geo.default_k", "value exceeds supported range"))?;
    let timeout = non_zero_millis(
        geo.timeout_ms.unwrap_or(DEFAULT_GEO_TIMEOUT_MS),
        "geo.timeout_ms",
    )?;

    Ok(GeoSettings {
        ipstack_url,
        ipstack_key,
        default_k,
        timeout,
    })
}

fn build_blacklist_settings(blacklist: RawBlacklistSettings) -> BlacklistSettings {
    let hosts = blacklist
        .hosts
        .into_iter()
        .map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
        .collect();

    BlacklistSettings {
        path: blacklist.path.filter(|path| !path.as_os_str().is_empty()),
        hosts,
    }
}

fn build_nodes(nodes: Vec<RawNode>) -> Result<Vec<Node>, LoadError> {
    let mut resolved: Vec<Node> = Vec::with_capacity(nodes.len());
    for raw in nodes {
        let url = non_empty(raw.url)
            .ok_or_else(|| LoadError::invalid("nodes.url", "every node needs a url"))?;
        parse_url(&url, "nodes.url")?;

        let (Some(longitude), Some(latitude)) = (raw.longitude, raw.latitude) else {
            return Err(LoadError::invalid(
                "nodes.coordinates",
                format!("node `{url}` needs both longitude and latitude"),
            ));
        };
        Coordinates::new(longitude, latitude)
            .validate()
            .map_err(|reason| LoadError::invalid("nodes.coordinates", format!("{url}: {reason}")))?;

        if resolved.iter().any(|node| node.url == url) {
            return Err(LoadError::invalid(
                "nodes.url",
                format!("node `{url}` is listed twice"),
            ));
        }

        resolved.push(Node {
            url,
            longitude,
            latitude,
        });
    }
    Ok(resolved)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    landing_url: Option<String>,
    public_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    serve_max_age_ms: Option<u64>,
    max_entries: Option<u64>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    timeout_ms: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPeerSettings {
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGeoSettings {
    ipstack_url: Option<String>,
    ipstack_key: Option<String>,
    default_k: Option<u64>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBlacklistSettings {
    path: Option<PathBuf>,
    hosts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStatsSettings {
    count_blocked_requests: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawNode {
    url: Option<String>,
    longitude: Option<f64>,
    latitude: Option<f64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid url `{value}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{other}`"),
        )),
    }
}

fn non_zero_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
