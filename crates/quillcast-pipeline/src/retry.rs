//! Backoff intervals for driver-call retries.

use std::time::Duration;

/// Computes the delay before a retry attempt (0-indexed).
pub trait IntervalFunction: Send + Sync {
    fn next_interval(&self, attempt: usize) -> Duration;
}

/// The same delay for every retry.
#[derive(Debug, Clone)]
pub struct FixedInterval {
    duration: Duration,
}

impl FixedInterval {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl IntervalFunction for FixedInterval {
    fn next_interval(&self, _attempt: usize) -> Duration {
        self.duration
    }
}

/// Exponential backoff with a hard cap.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: f64,
    cap: Duration,
}

impl ExponentialBackoff {
    /// Doubling backoff from `initial`, capped at `cap`.
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            multiplier: 2.0,
            cap,
        }
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

impl IntervalFunction for ExponentialBackoff {
    fn next_interval(&self, attempt: usize) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        self.initial.mul_f64(factor).min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_is_constant() {
        let backoff = FixedInterval::new(Duration::from_secs(2));
        assert_eq!(backoff.next_interval(0), Duration::from_secs(2));
        assert_eq!(backoff.next_interval(7), Duration::from_secs(2));
    }

    #[test]
    fn exponential_doubles_until_the_cap() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(backoff.next_interval(0), Duration::from_secs(1));
        assert_eq!(backoff.next_interval(1), Duration::from_secs(2));
        assert_eq!(backoff.next_interval(4), Duration::from_secs(16));
        assert_eq!(backoff.next_interval(5), Duration::from_secs(30));
        assert_eq!(backoff.next_interval(10), Duration::from_secs(30));
    }

    #[test]
    fn custom_multiplier() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(60))
            .multiplier(3.0);
        assert_eq!(backoff.next_interval(1), Duration::from_millis(300));
        assert_eq!(backoff.next_interval(2), Duration::from_millis(900));
    }
}
