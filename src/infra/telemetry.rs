use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the node emits. Safe to call more
/// than once.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "yacdn_cache_hit_total",
            Unit::Count,
            "Total number of retrievals served from a fresh cache entry."
        );
        describe_counter!(
            "yacdn_cache_miss_total",
            Unit::Count,
            "Total number of retrievals that found no fresh entry."
        );
        describe_counter!(
            "yacdn_cache_evict_total",
            Unit::Count,
            "Total number of payload evictions due to capacity."
        );
        describe_counter!(
            "yacdn_origin_fetch_total",
            Unit::Count,
            "Total number of origin fetches started."
        );
        describe_counter!(
            "yacdn_origin_error_total",
            Unit::Count,
            "Total number of origin fetches that failed."
        );
        describe_counter!(
            "yacdn_singleflight_coalesced_total",
            Unit::Count,
            "Total number of retrievals that joined an in-flight origin fetch."
        );
        describe_histogram!(
            "yacdn_origin_fetch_ms",
            Unit::Milliseconds,
            "Origin fetch latency in milliseconds."
        );
        describe_counter!(
            "yacdn_blacklist_reject_total",
            Unit::Count,
            "Total number of requests rejected for a blacklisted referer."
        );
        describe_counter!(
            "yacdn_peer_error_total",
            Unit::Count,
            "Total number of failed peer stats requests."
        );
    });
}
