//! telemetry - 可观测性库

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    Tracing(String),

    #[error("Failed to install Prometheus recorder: {0}")]
    Metrics(String),
}

/// 权限同步子系统的指标名
pub mod names {
    pub const CACHE_HITS: &str = "permission_cache_hits_total";
    pub const CACHE_MISSES: &str = "permission_cache_misses_total";
    pub const LOADS_STARTED: &str = "permission_loads_started_total";
    pub const LOADS_FAILED: &str = "permission_loads_failed_total";
    pub const LOADS_DISCARDED: &str = "permission_loads_discarded_total";
    pub const LOAD_DURATION_MS: &str = "permission_load_duration_ms";
    pub const EVICTIONS: &str = "permission_cache_evictions_total";
    pub const CHANGE_NOTIFICATIONS: &str = "permission_change_notifications_total";
    pub const ACTIVE_LISTENERS: &str = "permission_store_listeners";
}

/// 初始化 tracing
///
/// `RUST_LOG` 优先于 `log_level`
pub fn init_tracing(log_level: &str, json: bool) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| TelemetryError::Tracing(e.to_string()))
}

/// 初始化 Prometheus metrics
pub fn init_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle, TelemetryError> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    describe_metrics();
    Ok(handle)
}

/// 注册指标描述
pub fn describe_metrics() {
    describe_counter!(names::CACHE_HITS, "Permission lookups served from a fresh cache entry");
    describe_counter!(names::CACHE_MISSES, "Permission lookups that required a resolution");
    describe_counter!(names::LOADS_STARTED, "Permission resolutions started against the store");
    describe_counter!(names::LOADS_FAILED, "Permission resolutions that failed or timed out");
    describe_counter!(
        names::LOADS_DISCARDED,
        "Completed resolutions dropped because a newer invalidation superseded them"
    );
    describe_histogram!(
        names::LOAD_DURATION_MS,
        Unit::Milliseconds,
        "Time spent resolving one principal's permissions"
    );
    describe_counter!(names::EVICTIONS, "Cache entries evicted after the grace period");
    describe_counter!(
        names::CHANGE_NOTIFICATIONS,
        "Store change notifications fanned out to subscribers"
    );
    describe_gauge!(names::ACTIVE_LISTENERS, "Open store change listeners");
}
