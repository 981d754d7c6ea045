//! Reconnect backoff.
//!
//! Delay for attempt `n` is `min(base * factor^n, max)`; with the defaults
//! that is 1000ms, 1500ms, 2250ms, ... capped at 10s.
//!
//! [`Backoff`] tracks the attempt counter and the single pending reconnect
//! timer. A second [`Backoff::schedule`] while one is pending returns `None`.

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// First reconnect delay.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Growth factor per attempt.
const DEFAULT_FACTOR: f64 = 1.5;

/// Upper bound on any reconnect delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Exponential reconnect delay policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect.
    pub base_delay: Duration,
    /// Multiplier applied per attempt.
    pub factor: f64,
    /// Cap on the delay.
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Creates a policy.
    #[inline]
    #[must_use]
    pub const fn new(base_delay: Duration, factor: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            factor,
            max_delay,
        }
    }

    /// Returns the delay for a zero-based attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_ms = self.base_delay.as_secs_f64() * 1000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        let delay_ms = (base_ms * self.factor.powi(exponent)).min(max_ms);
        Duration::from_millis(delay_ms.round() as u64)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_FACTOR, DEFAULT_MAX_DELAY)
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Attempt counter plus the single-pending-timer guard.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
    pending: bool,
}

impl Backoff {
    /// Creates a backoff at attempt zero with no timer pending.
    #[inline]
    #[must_use]
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            pending: false,
        }
    }

    /// Schedules the next reconnect.
    ///
    /// Returns the delay to wait and increments the attempt counter, or
    /// `None` if a reconnect is already pending.
    pub fn schedule(&mut self) -> Option<Duration> {
        if self.pending {
            return None;
        }
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.pending = true;
        Some(delay)
    }

    /// Marks the pending timer as fired or cancelled.
    #[inline]
    pub fn fire(&mut self) {
        self.pending = false;
    }

    /// Resets the attempt counter after a successful open.
    #[inline]
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of reconnects scheduled since the last reset.
    #[inline]
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns `true` while a reconnect timer is outstanding.
    #[inline]
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delays() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2250));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn test_three_failures_then_reset() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        let mut delays = Vec::new();

        for _ in 0..3 {
            delays.push(backoff.schedule().expect("no timer pending"));
            backoff.fire();
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(1500),
                Duration::from_millis(2250),
            ]
        );

        // Successful open
        backoff.reset();
        assert_eq!(backoff.schedule(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_single_pending_timer() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());

        assert!(backoff.schedule().is_some());
        assert!(backoff.is_pending());
        assert_eq!(backoff.schedule(), None);
        assert_eq!(backoff.attempt(), 1);

        backoff.fire();
        assert!(!backoff.is_pending());
        assert_eq!(backoff.schedule(), Some(Duration::from_millis(1500)));
    }
}
