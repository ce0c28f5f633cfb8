//! Reconnect backoff policy
//!
//! Deterministic exponential backoff without jitter:
//!
//! ```text
//! delay(n) = min(base * factor^n, max_delay)
//! ```
//!
//! With the defaults (2s base, factor 1.5, 30s cap) the sequence is
//! 2s, 3s, 4.5s, 6.75s, 10.125s, ... and reaches the cap at attempt 7.
//! There is a single client per operator session, so there is no
//! thundering herd to spread out.

use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Default upper bound for any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Default growth factor between consecutive attempts.
pub const DEFAULT_FACTOR: f64 = 1.5;

/// Default number of unplanned closes tolerated before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Backoff configuration shared by the reconnect and credential-wait paths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay for attempt 0
    pub base: Duration,
    /// Multiplier applied per attempt
    pub factor: f64,
    /// Cap for any single delay
    pub max_delay: Duration,
    /// Reconnect budget per demand period (does not apply to credential waits)
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            factor: DEFAULT_FACTOR,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl Backoff {
    /// Delay to wait before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_ms = self.base.as_millis() as f64;
        let cap_ms = self.max_delay.as_millis() as f64;
        let ms = (base_ms * self.factor.powi(exponent)).min(cap_ms);
        Duration::from_millis(ms as u64)
    }

    /// Whether another reconnect may be scheduled after `attempt` failures.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(2000));
        assert_eq!(backoff.delay(1), Duration::from_millis(3000));
        assert_eq!(backoff.delay(2), Duration::from_millis(4500));
        assert_eq!(backoff.delay(3), Duration::from_millis(6750));
        assert_eq!(backoff.delay(4), Duration::from_millis(10125));
    }

    #[test]
    fn test_delay_is_capped() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(7), Duration::from_millis(30_000));
        assert_eq!(backoff.delay(29), Duration::from_millis(30_000));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_delay_never_decreases() {
        let backoff = Backoff::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..40 {
            let delay = backoff.delay(attempt);
            assert!(delay >= previous, "attempt {} went backwards", attempt);
            previous = delay;
        }
    }

    #[test]
    fn test_budget() {
        let backoff = Backoff::default();
        assert!(backoff.allows(0));
        assert!(backoff.allows(29));
        assert!(!backoff.allows(30));
    }

    #[test]
    fn test_custom_policy() {
        let backoff = Backoff {
            base: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_millis(1000),
            max_attempts: 3,
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_millis(1000));
        assert!(!backoff.allows(3));
    }
}
