//! Retry policy: exponential backoff with jitter.

use std::time::Duration;

/// Retry policy for delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts per (event, endpoint) pair, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

/// Relative jitter applied around the nominal delay (±25%).
const JITTER_PERCENT: u64 = 25;

impl RetryPolicy {
    /// Whether a transient failure of `attempt_number` may be retried.
    pub fn should_retry(&self, attempt_number: u32) -> bool {
        attempt_number < self.max_attempts
    }

    /// `min(max_delay, base * 2^(attempt_number - 1))`, before jitter.
    pub fn nominal_delay(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(32);
        let base_ms = self.base_delay.as_millis().min(u128::from(u64::MAX)) as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Range the jittered delay after `attempt_number` is drawn from.
    ///
    /// The window is the nominal delay ±25%, capped at `max_delay`, and never starts
    /// below the previous attempt's upper bound. Consecutive windows therefore do not
    /// overlap and any sequence of draws is non-decreasing.
    pub fn jitter_window(&self, attempt_number: u32) -> (Duration, Duration) {
        let upper = |n: u32| {
            let nominal = self.nominal_delay(n);
            (nominal + nominal * JITTER_PERCENT as u32 / 100).min(self.max_delay)
        };

        let nominal = self.nominal_delay(attempt_number);
        let hi = upper(attempt_number);
        let mut lo = nominal - nominal * JITTER_PERCENT as u32 / 100;
        if attempt_number > 1 {
            lo = lo.max(upper(attempt_number - 1));
        }
        (lo.min(hi), hi)
    }

    /// Delay before retrying after `attempt_number` failed.
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        let (lo, hi) = self.jitter_window(attempt_number);
        let span_ms = (hi - lo).as_millis() as u64;
        if span_ms == 0 {
            return lo;
        }
        lo + Duration::from_millis(rand::random::<u64>() % (span_ms + 1))
    }

    /// Backoff delay raised to a server `Retry-After` hint, capped at `max_delay`.
    pub fn delay_with_hint(&self, attempt_number: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.delay_for(attempt_number);
        match retry_after {
            Some(hint) if hint > delay => hint.min(self.max_delay),
            _ => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 8,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(20_000),
        }
    }

    #[test]
    fn test_nominal_delay_doubles_until_cap() {
        let p = policy();
        let delays: Vec<u128> = (1..=7).map(|n| p.nominal_delay(n).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 20000, 20000]);
    }

    #[test]
    fn test_first_window_is_symmetric() {
        let (lo, hi) = policy().jitter_window(1);
        assert_eq!(lo, Duration::from_millis(750));
        assert_eq!(hi, Duration::from_millis(1250));
    }

    #[test]
    fn test_delays_are_non_decreasing() {
        let p = policy();
        for _ in 0..200 {
            let delays: Vec<Duration> = (1..p.max_attempts).map(|n| p.delay_for(n)).collect();
            for pair in delays.windows(2) {
                assert!(pair[0] <= pair[1], "backoff decreased: {:?}", delays);
            }
            assert!(delays.iter().all(|d| *d <= p.max_delay));
        }
    }

    #[test]
    fn test_should_retry_is_bounded() {
        let p = RetryPolicy::default();
        assert!(p.should_retry(1));
        assert!(p.should_retry(4));
        assert!(!p.should_retry(5));
        assert!(!p.should_retry(6));
    }

    #[test]
    fn test_retry_after_hint() {
        let p = policy();
        assert_eq!(
            p.delay_with_hint(1, Some(Duration::from_secs(10))),
            Duration::from_secs(10)
        );
        assert_eq!(
            p.delay_with_hint(1, Some(Duration::from_secs(3600))),
            p.max_delay
        );
        assert!(p.delay_with_hint(1, Some(Duration::from_millis(1))) >= Duration::from_millis(750));
    }

    #[test]
    fn test_huge_attempt_numbers_saturate() {
        let p = policy();
        assert_eq!(p.nominal_delay(u32::MAX), p.max_delay);
        assert_eq!(p.delay_for(u32::MAX), p.max_delay);
    }
}
