//! # Metrics
//!
//! Prometheus metrics for monitoring the reload pipeline.
//!
//! ## Metrics Exposed
//!
//! - `config_reload_watch_events_total` - Watch notifications received, by kind
//! - `config_reload_watch_events_suppressed_total` - Notifications dropped as duplicates
//! - `config_reload_watch_restarts_total` - Watch resubscriptions, by kind
//! - `config_reload_recomputations_total` - Snapshot recomputations started
//! - `config_reload_recomputation_duration_seconds` - Duration of resolve + build
//! - `config_reload_build_errors_total` - Failed recomputations, by error kind
//! - `config_reload_refreshes_total` - Refresh callbacks that succeeded
//! - `config_reload_refresh_errors_total` - Refresh callbacks that failed or timed out
//! - `config_reload_snapshot_properties` - Properties in the applied snapshot

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static WATCH_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "config_reload_watch_events_total",
            "Total number of watch notifications received by source kind",
        ),
        &["kind"],
    )
    .expect("Failed to create WATCH_EVENTS_TOTAL metric - this should never happen")
});

static WATCH_EVENTS_SUPPRESSED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "config_reload_watch_events_suppressed_total",
        "Total number of watch notifications dropped because the resource version was unchanged",
    )
    .expect("Failed to create WATCH_EVENTS_SUPPRESSED_TOTAL metric - this should never happen")
});

static WATCH_RESTARTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "config_reload_watch_restarts_total",
            "Total number of watch resubscriptions by source kind",
        ),
        &["kind"],
    )
    .expect("Failed to create WATCH_RESTARTS_TOTAL metric - this should never happen")
});

static RECOMPUTATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "config_reload_recomputations_total",
        "Total number of snapshot recomputations",
    )
    .expect("Failed to create RECOMPUTATIONS_TOTAL metric - this should never happen")
});

static RECOMPUTATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "config_reload_recomputation_duration_seconds",
            "Duration of source resolution plus snapshot build in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("Failed to create RECOMPUTATION_DURATION metric - this should never happen")
});

static BUILD_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "config_reload_build_errors_total",
            "Total number of failed recomputations by error kind",
        ),
        &["error"],
    )
    .expect("Failed to create BUILD_ERRORS_TOTAL metric - this should never happen")
});

static REFRESHES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "config_reload_refreshes_total",
        "Total number of successful refresh callbacks",
    )
    .expect("Failed to create REFRESHES_TOTAL metric - this should never happen")
});

static REFRESH_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "config_reload_refresh_errors_total",
            "Total number of failed refresh callbacks by error kind",
        ),
        &["error"],
    )
    .expect("Failed to create REFRESH_ERRORS_TOTAL metric - this should never happen")
});

static SNAPSHOT_PROPERTIES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "config_reload_snapshot_properties",
        "Number of properties in the currently applied snapshot",
    )
    .expect("Failed to create SNAPSHOT_PROPERTIES metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(WATCH_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCH_EVENTS_SUPPRESSED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCH_RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECOMPUTATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECOMPUTATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(BUILD_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REFRESHES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REFRESH_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SNAPSHOT_PROPERTIES.clone()))?;

    Ok(())
}

pub fn increment_watch_events(kind: &str) {
    WATCH_EVENTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_watch_events_suppressed() {
    WATCH_EVENTS_SUPPRESSED_TOTAL.inc();
}

pub fn increment_watch_restarts(kind: &str) {
    WATCH_RESTARTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_recomputations() {
    RECOMPUTATIONS_TOTAL.inc();
}

pub fn observe_recomputation_duration(duration: f64) {
    RECOMPUTATION_DURATION.observe(duration);
}

/// Increment build errors counter, labeled by `ReloadError::as_str`
pub fn increment_build_errors(error: &str) {
    BUILD_ERRORS_TOTAL.with_label_values(&[error]).inc();
}

pub fn increment_refreshes() {
    REFRESHES_TOTAL.inc();
}

pub fn increment_refresh_errors(error: &str) {
    REFRESH_ERRORS_TOTAL.with_label_values(&[error]).inc();
}

pub fn set_snapshot_properties(count: usize) {
    SNAPSHOT_PROPERTIES.set(i64::try_from(count).unwrap_or(i64::MAX));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // Registration may already have happened in another test
        let _ = register_metrics();
        assert!(!REGISTRY.gather().is_empty());
    }

    #[test]
    fn test_increment_watch_events() {
        let before = WATCH_EVENTS_TOTAL.with_label_values(&["configmap"]).get();
        increment_watch_events("configmap");
        let after = WATCH_EVENTS_TOTAL.with_label_values(&["configmap"]).get();
        assert!(after > before);
    }

    #[test]
    fn test_increment_watch_events_suppressed() {
        let before = WATCH_EVENTS_SUPPRESSED_TOTAL.get();
        increment_watch_events_suppressed();
        let after = WATCH_EVENTS_SUPPRESSED_TOTAL.get();
        assert!(after > before);
    }

    #[test]
    fn test_increment_watch_restarts() {
        let before = WATCH_RESTARTS_TOTAL.with_label_values(&["secret"]).get();
        increment_watch_restarts("secret");
        let after = WATCH_RESTARTS_TOTAL.with_label_values(&["secret"]).get();
        assert!(after > before);
    }

    #[test]
    fn test_increment_recomputations() {
        let before = RECOMPUTATIONS_TOTAL.get();
        increment_recomputations();
        let after = RECOMPUTATIONS_TOTAL.get();
        assert!(after > before);
    }

    #[test]
    fn test_observe_recomputation_duration() {
        let before = RECOMPUTATION_DURATION.get_sample_count();
        observe_recomputation_duration(0.25);
        assert!(RECOMPUTATION_DURATION.get_sample_count() > before);
    }

    #[test]
    fn test_increment_build_errors() {
        let before = BUILD_ERRORS_TOTAL.with_label_values(&["decode"]).get();
        increment_build_errors("decode");
        let after = BUILD_ERRORS_TOTAL.with_label_values(&["decode"]).get();
        assert!(after > before);
    }

    #[test]
    fn test_increment_refresh_counters() {
        let before_ok = REFRESHES_TOTAL.get();
        let before_err = REFRESH_ERRORS_TOTAL
            .with_label_values(&["refresh-timeout"])
            .get();
        increment_refreshes();
        increment_refresh_errors("refresh-timeout");
        assert!(REFRESHES_TOTAL.get() > before_ok);
        assert!(
            REFRESH_ERRORS_TOTAL
                .with_label_values(&["refresh-timeout"])
                .get()
                > before_err
        );
    }

    #[test]
    fn test_set_snapshot_properties() {
        set_snapshot_properties(12);
        assert_eq!(SNAPSHOT_PROPERTIES.get(), 12);
        set_snapshot_properties(3);
        assert_eq!(SNAPSHOT_PROPERTIES.get(), 3);
    }
}
