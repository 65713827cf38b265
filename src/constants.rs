//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Namespace used when `POD_NAMESPACE` is not set
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default watch resubscription backoff starting value (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_START_MS: u64 = 1000;

/// Default watch resubscription backoff maximum value (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_MAX_MS: u64 = 30_000;

/// Buffered change events between the watch tasks and the reload loop
pub const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Default quiet window that coalesces a burst of changes into one reload (milliseconds)
pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;

/// Default period between recomputations in polling mode (seconds)
pub const DEFAULT_POLL_PERIOD_SECS: u64 = 15;

/// Default upper bound for a single refresh callback (seconds)
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 30;

/// Default path of the declarative sources file
pub const DEFAULT_SOURCES_FILE: &str = "/etc/config-reload/sources.yaml";
