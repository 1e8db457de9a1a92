//! Retry pacing: exponential backoff with a hard ceiling, plus the queue's
//! concurrency and scan cadence.

use std::time::Duration;

pub const DEFAULT_BASE_DELAY_MS: u64 = 2_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 300_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    /// Jobs claimed per scan, not a global ceiling.
    pub concurrency: usize,
    pub scan_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            concurrency: DEFAULT_CONCURRENCY,
            scan_interval: DEFAULT_SCAN_INTERVAL,
        }
    }
}

impl RetryPolicy {
    /// Delay owed after `attempts` tries: `base * 2^(attempts - 1)`, capped
    /// at the maximum. A job with no attempts yet owes nothing.
    pub fn delay_ms(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return 0;
        }
        let exp = attempts.saturating_sub(1).min(63);
        let factor = 1u64 << exp;
        self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_from_the_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_ms(1), 2_000);
        assert_eq!(policy.delay_ms(2), 4_000);
        assert_eq!(policy.delay_ms(3), 8_000);
        assert_eq!(policy.delay_ms(4), 16_000);
        assert_eq!(policy.delay_ms(5), 32_000);
    }

    #[test]
    fn delay_is_capped_at_the_maximum() {
        let policy = RetryPolicy::default();
        // 2000 * 2^7 = 256_000 is the last uncapped step.
        assert_eq!(policy.delay_ms(8), 256_000);
        assert_eq!(policy.delay_ms(9), 300_000);
        assert_eq!(policy.delay_ms(20), 300_000);
        assert_eq!(policy.delay_ms(u32::MAX), 300_000);
    }

    #[test]
    fn delay_is_monotone_nondecreasing() {
        let policy = RetryPolicy::default();
        let mut previous = 0;
        for attempts in 0..=40 {
            let delay = policy.delay_ms(attempts);
            assert!(
                delay >= previous,
                "delay regressed at attempt {attempts}: {delay} < {previous}"
            );
            previous = delay;
        }
    }

    #[test]
    fn unattempted_jobs_owe_no_delay() {
        assert_eq!(RetryPolicy::default().delay_ms(0), 0);
    }

    #[test]
    fn huge_base_saturates_instead_of_wrapping() {
        let policy = RetryPolicy {
            base_delay_ms: u64::MAX / 2,
            max_delay_ms: u64::MAX,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_ms(40), u64::MAX);
    }
}
