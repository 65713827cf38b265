//! # Error Policy
//!
//! Failure handling for the watch tasks and the reload loop.
//!
//! - Expired resource versions (410) resubscribe immediately on the first
//!   failure; repeated expiries fall back to the backoff.
//! - Every other transport failure waits for the next backoff step.
//! - Recomputation failures keep the last applied snapshot and are counted
//!   by error kind.

use crate::backoff::ExponentialBackoff;
use crate::error::{ReloadError, TransportError};
use crate::observability::metrics;
use std::time::Duration;
use tracing::{error, warn};

/// Delay before resubscribing after `failure`
///
/// Always advances `backoff` so the attempt is counted.
pub fn watch_restart_delay(failure: &TransportError, backoff: &mut ExponentialBackoff) -> Duration {
    let first_failure = backoff.attempts() == 0;
    let delay = backoff.next_backoff();

    match failure {
        TransportError::Expired(_) if first_failure => {
            warn!(error_type = "410", "watch.error.resource_version_expired");
            Duration::ZERO
        }
        TransportError::Expired(_) => delay,
        TransportError::Disconnected(message) => {
            if is_unauthorized(message) {
                error!(
                    "Watch authentication failed (401 Unauthorized) - check the Role granting get/list/watch on configmaps and secrets"
                );
            } else if is_throttled(message) {
                warn!(error_type = "429", "watch.error.throttled");
            }
            delay
        }
    }
}

/// Log and count a failed recomputation. The applied snapshot is left untouched.
pub fn report_build_error(error: &ReloadError) {
    metrics::increment_build_errors(error.as_str());
    match error {
        ReloadError::Cluster(_) | ReloadError::Transport(_) => {
            warn!(error = %error, error_type = error.as_str(), "reload.recompute.failed");
        }
        _ => {
            error!(error = %error, error_type = error.as_str(), "reload.recompute.failed");
        }
    }
}

fn is_unauthorized(message: &str) -> bool {
    message.contains("401") || message.contains("Unauthorized")
}

fn is_throttled(message: &str) -> bool {
    message.contains("429")
        || message.contains("TooManyRequests")
        || message.contains("storage is (re)initializing")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    #[test]
    fn test_first_expiry_resubscribes_immediately() {
        let mut backoff = backoff();
        let delay = watch_restart_delay(&TransportError::Expired("410 Gone".into()), &mut backoff);
        assert_eq!(delay, Duration::ZERO);
        assert_eq!(backoff.attempts(), 1);
    }

    #[test]
    fn test_repeated_expiry_backs_off() {
        let mut backoff = backoff();
        let expired = TransportError::Expired("410 Gone".into());
        watch_restart_delay(&expired, &mut backoff);
        assert_eq!(watch_restart_delay(&expired, &mut backoff), Duration::from_secs(2));
    }

    #[test]
    fn test_disconnect_uses_backoff_sequence() {
        let mut backoff = backoff();
        let dropped = TransportError::Disconnected("connection reset".into());
        assert_eq!(watch_restart_delay(&dropped, &mut backoff), Duration::from_secs(1));
        assert_eq!(watch_restart_delay(&dropped, &mut backoff), Duration::from_secs(2));
        assert_eq!(watch_restart_delay(&dropped, &mut backoff), Duration::from_secs(4));
    }

    #[test]
    fn test_error_classification() {
        assert!(is_unauthorized("ApiError: Unauthorized (401)"));
        assert!(is_throttled("429 TooManyRequests"));
        assert!(!is_throttled("connection reset"));
    }
}
