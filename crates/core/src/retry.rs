//! Retry policy: how hard a call site tries before giving up.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff plus the per-attempt timeout.
///
/// Attempt `i` (0-based) that fails is followed by a sleep of
/// `base_delay * factor^i`, unless it was the last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`
    pub max_retries: u32,

    pub base_delay: Duration,

    pub factor: f64,

    /// Deadline for a single transport call
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, factor: f64, timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            factor,
            timeout,
        }
    }

    /// Interactive chat: fail fast, the user is watching.
    pub fn chat() -> Self {
        Self::new(2, Duration::from_millis(500), 2.0, Duration::from_secs(60))
    }

    /// One-shot code generation.
    pub fn generation() -> Self {
        Self::new(3, Duration::from_secs(1), 2.0, Duration::from_secs(120))
    }

    /// Batch project analysis: long prompts, patient retries.
    pub fn analysis() -> Self {
        Self::new(4, Duration::from_secs(2), 2.0, Duration::from_secs(300))
    }

    /// A single attempt, no backoff.
    pub fn no_retry(timeout: Duration) -> Self {
        Self::new(0, Duration::ZERO, 1.0, timeout)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Sleep after failed attempt `attempt` (0-based).
    ///
    /// Saturates at `Duration::MAX`; a NaN factor falls back to the base delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        if secs.is_nan() {
            return self.base_delay;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::chat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_geometrically() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), 2.0, Duration::from_secs(1));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn huge_factor_saturates() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), 1e30, Duration::from_secs(1));
        assert_eq!(policy.delay_for(0), Duration::from_millis(1));
        assert_eq!(policy.delay_for(2), Duration::MAX);
        assert_eq!(policy.delay_for(u32::MAX), Duration::MAX);
    }

    #[test]
    fn nan_factor_keeps_base_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(5), f64::NAN, Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(5));
    }

    #[test]
    fn fractional_factor() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1000), 1.5, Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1500));
    }

    #[test]
    fn attempts_include_first_try() {
        assert_eq!(RetryPolicy::chat().max_attempts(), 3);
        assert_eq!(RetryPolicy::no_retry(Duration::from_secs(1)).max_attempts(), 1);
    }

    #[test]
    fn chat_is_more_impatient_than_analysis() {
        let chat = RetryPolicy::chat();
        let analysis = RetryPolicy::analysis();
        assert!(chat.timeout < analysis.timeout);
        assert!(chat.max_retries < analysis.max_retries);
    }
}
