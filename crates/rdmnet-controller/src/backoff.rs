// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconnect backoff.
//!
//! Each failed or abandoned connection attempt grows the retry delay by a
//! constant factor, starting at a floor and capped at a ceiling:
//!
//! ```text
//! delay(1) = floor
//! delay(n) = min(delay(n-1) * growth_factor, ceiling)
//! ```
//!
//! The per-endpoint state is reset once a session is confirmed, so the next
//! outage starts from the floor again.

use std::time::Duration;

/// Default growth factor between consecutive retries.
pub const DEFAULT_GROWTH_FACTOR: f64 = 2.0;

/// Retry delay schedule shared by every endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    floor: Duration,
    ceiling: Duration,
    growth_factor: f64,
}

impl BackoffPolicy {
    /// Create a doubling policy between `floor` and `ceiling`.
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
            growth_factor: DEFAULT_GROWTH_FACTOR,
        }
    }

    /// Set the growth factor (values below 1.0 are clamped to 1.0).
    pub fn with_growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = if factor.is_finite() {
            factor.max(1.0)
        } else {
            DEFAULT_GROWTH_FACTOR
        };
        self
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    pub fn growth_factor(&self) -> f64 {
        self.growth_factor
    }

    /// Delay following `previous`, or the floor for the first retry.
    pub fn next_delay(&self, previous: Option<Duration>) -> Duration {
        let Some(previous) = previous else {
            return self.floor;
        };

        let grown = Duration::try_from_secs_f64(previous.as_secs_f64() * self.growth_factor)
            .unwrap_or(self.ceiling);
        grown.clamp(self.floor, self.ceiling)
    }
}

/// Per-endpoint attempt counter and current delay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackoffState {
    attempts: u32,
    current: Option<Duration>,
}

impl BackoffState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed attempt and return the delay before the next one.
    pub fn advance(&mut self, policy: &BackoffPolicy) -> Duration {
        let delay = policy.next_delay(self.current);
        self.current = Some(delay);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Forget past failures; the next retry waits the floor delay.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = None;
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay most recently handed out, if any.
    pub fn current_delay(&self) -> Option<Duration> {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(30))
    }

    #[test]
    fn test_first_delay_is_floor() {
        let mut state = BackoffState::new();
        assert_eq!(state.advance(&policy()), Duration::from_secs(5));
        assert_eq!(state.attempts(), 1);
    }

    #[test]
    fn test_doubling_up_to_ceiling() {
        let mut state = BackoffState::new();
        let delays: Vec<u64> = (0..6).map(|_| state.advance(&policy()).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 30, 30, 30]);
    }

    #[test]
    fn test_monotonic_and_bounded() {
        let policy = policy().with_growth_factor(1.5);
        let mut state = BackoffState::new();
        let mut last = Duration::ZERO;
        for _ in 0..50 {
            let delay = state.advance(&policy);
            assert!(delay >= last);
            assert!(delay <= policy.ceiling());
            last = delay;
        }
        assert_eq!(last, policy.ceiling());
    }

    #[test]
    fn test_reset_returns_to_floor() {
        let mut state = BackoffState::new();
        for _ in 0..4 {
            state.advance(&policy());
        }
        state.reset();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.current_delay(), None);
        assert_eq!(state.advance(&policy()), Duration::from_secs(5));
    }

    #[test]
    fn test_growth_factor_clamped() {
        let policy = policy().with_growth_factor(0.5);
        assert_eq!(policy.growth_factor(), 1.0);
        assert_eq!(
            policy.next_delay(Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );

        let policy = policy.with_growth_factor(f64::NAN);
        assert_eq!(policy.growth_factor(), DEFAULT_GROWTH_FACTOR);
    }

    #[test]
    fn test_huge_factor_saturates_at_ceiling() {
        let policy = policy().with_growth_factor(1e300);
        assert_eq!(
            policy.next_delay(Some(Duration::from_secs(5))),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_ceiling_never_below_floor() {
        let policy = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(policy.ceiling(), Duration::from_secs(10));
    }
}
