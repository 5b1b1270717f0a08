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
///
/// Logs go to stderr so command output on stdout stays machine-readable.
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "quill_cache_hit_total",
            Unit::Count,
            "Entity lookups answered by the cache store, by kind."
        );
        describe_counter!(
            "quill_cache_miss_total",
            Unit::Count,
            "Entity lookups that fell through to the backing store, by kind."
        );
        describe_counter!(
            "quill_cache_error_total",
            Unit::Count,
            "Cache store operations that failed and were degraded, by op."
        );
        describe_counter!(
            "quill_list_cache_hit_total",
            Unit::Count,
            "Whole-list lookups answered by the cache store."
        );
        describe_counter!(
            "quill_list_cache_miss_total",
            Unit::Count,
            "Whole-list lookups that required a recomputation."
        );
        describe_counter!(
            "quill_list_cache_coalesced_total",
            Unit::Count,
            "Callers that joined an in-flight list computation."
        );
        describe_histogram!(
            "quill_relations_load_ms",
            Unit::Milliseconds,
            "Relation loading latency per batch in milliseconds."
        );
        describe_histogram!(
            "quill_relations_assembly_ms",
            Unit::Milliseconds,
            "Post view assembly latency per batch in milliseconds."
        );
    });
}
