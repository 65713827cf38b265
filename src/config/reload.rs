//! # Reload Configuration
//!
//! Runtime settings loaded from environment variables.

use crate::constants::{
    DEFAULT_DEBOUNCE_MS, DEFAULT_METRICS_PORT, DEFAULT_NAMESPACE, DEFAULT_POLL_PERIOD_SECS,
    DEFAULT_REFRESH_TIMEOUT_SECS, DEFAULT_WATCH_BACKOFF_MAX_MS, DEFAULT_WATCH_BACKOFF_START_MS,
};
use crate::resolver::{EmptySelectorPolicy, ResolverOptions};
use crate::watcher::WatcherOptions;
use std::time::Duration;

/// How recomputations are triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadMode {
    /// Watch notifications, debounced
    Event,
    /// Re-resolve on a fixed period without watching
    Polling { period: Duration },
}

impl ReloadMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReloadMode::Event => "event",
            ReloadMode::Polling { .. } => "polling",
        }
    }
}

/// Reload settings
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadConfig {
    /// Namespace sources are resolved in unless a rule overrides it
    pub namespace: String,
    pub mode: ReloadMode,
    /// Quiet window that coalesces a burst of change events
    pub debounce: Duration,
    /// Watch resubscription backoff starting value (milliseconds)
    pub watch_backoff_start_ms: u64,
    /// Watch resubscription backoff maximum value (milliseconds)
    pub watch_backoff_max_ms: u64,
    /// Upper bound for one refresh callback
    pub refresh_timeout: Duration,
    pub monitor_config_maps: bool,
    pub monitor_secrets: bool,
    /// Missing name-selected sources abort resolution
    pub fail_fast: bool,
    pub empty_selector: EmptySelectorPolicy,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            mode: ReloadMode::Event,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            watch_backoff_start_ms: DEFAULT_WATCH_BACKOFF_START_MS,
            watch_backoff_max_ms: DEFAULT_WATCH_BACKOFF_MAX_MS,
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            monitor_config_maps: true,
            monitor_secrets: true,
            fail_fast: true,
            empty_selector: EmptySelectorPolicy::Proceed,
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: "text".to_string(),
        }
    }
}

impl ReloadConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup (environment, test fixtures)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mode = match var_or_default_str(&lookup, "RELOAD_MODE", "event")
            .to_lowercase()
            .as_str()
        {
            "polling" => ReloadMode::Polling {
                period: Duration::from_secs(var_or_default(
                    &lookup,
                    "RELOAD_PERIOD_SECS",
                    DEFAULT_POLL_PERIOD_SECS,
                )),
            },
            _ => ReloadMode::Event,
        };

        Self {
            namespace: var_or_default_str(&lookup, "POD_NAMESPACE", DEFAULT_NAMESPACE),
            mode,
            debounce: Duration::from_millis(var_or_default(
                &lookup,
                "RELOAD_DEBOUNCE_MS",
                DEFAULT_DEBOUNCE_MS,
            )),
            watch_backoff_start_ms: var_or_default(
                &lookup,
                "WATCH_BACKOFF_START_MS",
                DEFAULT_WATCH_BACKOFF_START_MS,
            ),
            watch_backoff_max_ms: var_or_default(
                &lookup,
                "WATCH_BACKOFF_MAX_MS",
                DEFAULT_WATCH_BACKOFF_MAX_MS,
            ),
            refresh_timeout: Duration::from_secs(var_or_default(
                &lookup,
                "REFRESH_TIMEOUT_SECS",
                DEFAULT_REFRESH_TIMEOUT_SECS,
            )),
            monitor_config_maps: var_or_default_bool(&lookup, "MONITOR_CONFIG_MAPS", true),
            monitor_secrets: var_or_default_bool(&lookup, "MONITOR_SECRETS", true),
            fail_fast: var_or_default_bool(&lookup, "FAIL_FAST", true),
            empty_selector: var_or_default(
                &lookup,
                "EMPTY_SELECTOR_POLICY",
                EmptySelectorPolicy::Proceed,
            ),
            metrics_port: var_or_default(&lookup, "METRICS_PORT", DEFAULT_METRICS_PORT),
            log_format: var_or_default_str(&lookup, "LOG_FORMAT", "text"),
        }
    }

    /// Resolver settings; prefix default and profiles come from the sources file
    #[must_use]
    pub fn resolver_options(
        &self,
        use_name_as_prefix: bool,
        profiles: Vec<String>,
    ) -> ResolverOptions {
        ResolverOptions {
            fail_fast: self.fail_fast,
            empty_selector: self.empty_selector,
            use_name_as_prefix,
            profiles,
        }
    }

    #[must_use]
    pub fn watcher_options(&self) -> WatcherOptions {
        WatcherOptions {
            backoff_start: Duration::from_millis(self.watch_backoff_start_ms),
            backoff_max: Duration::from_millis(self.watch_backoff_max_ms),
        }
    }
}

/// Read a variable or return default value
fn var_or_default<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Read a variable as boolean or return default
fn var_or_default_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key)
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read a variable as string or return default
fn var_or_default_str(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}
