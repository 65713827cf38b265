//! # Exponential Backoff
//!
//! Backoff used between watch resubscriptions. Each failure doubles the
//! delay until the cap is reached; a successfully received event resets it.
//!
//! Default sequence: 1s, 2s, 4s, 8s, 16s, 30s (max).
//!
//! ## Usage
//!
//! ```rust
//! use config_reload_controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
//! ```

use std::time::Duration;

/// Exponential backoff calculator
///
/// Generates doubling delays capped at `max`. Calculations are done in
/// milliseconds.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Initial delay in milliseconds (for reset)
    base_ms: u64,
    /// Delay returned by the next call
    current_ms: u64,
    /// Maximum delay in milliseconds
    max_ms: u64,
    /// Consecutive failures since the last reset
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff starting at `base` and capped at `max`
    ///
    /// A zero `base` is treated as one millisecond so the sequence still grows.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX).max(1);
        let max_ms = u64::try_from(max.as_millis())
            .unwrap_or(u64::MAX)
            .max(base_ms);
        Self {
            base_ms,
            current_ms: base_ms,
            max_ms,
            attempts: 0,
        }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_ms;
        self.current_ms = self.current_ms.saturating_mul(2).min(self.max_ms);
        self.attempts = self.attempts.saturating_add(1);
        Duration::from_millis(result)
    }

    /// Consecutive failures since the last reset
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset the backoff to the initial state
    ///
    /// # Example
    ///
    /// ```
    /// use config_reload_controller::backoff::ExponentialBackoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
    /// backoff.next_backoff();
    /// backoff.next_backoff();
    /// backoff.reset();
    /// assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
    /// ```
    pub fn reset(&mut self) {
        self.current_ms = self.base_ms;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));

        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(8));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(16));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(30)); // capped
        assert_eq!(backoff.next_backoff(), Duration::from_secs(30));
        assert_eq!(backoff.attempts(), 7);
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));

        backoff.next_backoff();
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.reset();

        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_max_below_base_is_raised_to_base() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(1));

        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
    }
}
