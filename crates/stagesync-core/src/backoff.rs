//! Exponential backoff with random jitter, shared by the retry queue and the
//! channel's reconnect loop.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Upper bound (exclusive) of the random jitter added to each delay
    pub jitter: Duration,
}

impl Backoff {
    #[must_use]
    pub const fn new(base: Duration, max: Duration, jitter: Duration) -> Self {
        Self { base, max, jitter }
    }

    /// Delay before retry number `attempt` (1-based) with an explicit jitter:
    /// `min(max, base * 2^(attempt - 1) + jitter)`.
    #[must_use]
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let scaled = self.base.saturating_mul(1_u32 << exponent);
        scaled.saturating_add(jitter).min(self.max)
    }

    /// Delay before retry number `attempt` with a freshly sampled jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, self.sample_jitter())
    }

    fn sample_jitter(&self) -> Duration {
        let bound = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let backoff = backoff();
        assert_eq!(backoff.delay_with_jitter(1, Duration::ZERO), Duration::from_secs(1));
        assert_eq!(backoff.delay_with_jitter(2, Duration::ZERO), Duration::from_secs(2));
        assert_eq!(backoff.delay_with_jitter(3, Duration::ZERO), Duration::from_secs(4));
    }

    #[test]
    fn delay_is_capped_including_jitter() {
        let backoff = backoff();
        assert_eq!(
            backoff.delay_with_jitter(10, Duration::from_millis(900)),
            Duration::from_secs(30)
        );
        assert_eq!(backoff.delay_with_jitter(u32::MAX, Duration::ZERO), Duration::from_secs(30));
    }

    #[test]
    fn sampled_jitter_stays_in_bounds() {
        let backoff = backoff();
        for _ in 0..100 {
            let delay = backoff.delay(2);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay < Duration::from_secs(3));
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let backoff = Backoff::new(
            Duration::from_millis(5),
            Duration::from_millis(20),
            Duration::ZERO,
        );
        assert_eq!(backoff.delay(1), Duration::from_millis(5));
        assert_eq!(backoff.delay(4), Duration::from_millis(20));
    }
}
