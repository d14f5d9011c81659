use serde::{Deserialize, Serialize};

/// Bounded exponential backoff for completion requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt_ms(&self, attempt: u32, jitter_seed: u64) -> u64 {
        let exp = attempt.saturating_sub(1) as i32;
        let base = (self.initial_delay_ms as f64) * self.backoff_factor.powi(exp);
        let mut delay = base.min(self.max_delay_ms as f64);
        if self.jitter {
            delay *= jitter_factor(attempt, jitter_seed);
        }
        delay.round().max(0.0) as u64
    }
}

// xorshift mix; yields a factor in [0.5, 1.5).
fn jitter_factor(attempt: u32, jitter_seed: u64) -> f64 {
    let mut x = jitter_seed ^ ((attempt as u64) << 32) ^ 0x9E37_79B9_7F4A_7C15;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    let r = x.wrapping_mul(0x2545_F491_4F6C_DD1D);
    0.5 + (r as f64) / (u64::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_exponentially_without_jitter() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt_ms(1, 0), 500);
        assert_eq!(policy.delay_for_attempt_ms(2, 0), 1_000);
        assert_eq!(policy.delay_for_attempt_ms(3, 0), 2_000);
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy {
            jitter: false,
            max_delay_ms: 1_500,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt_ms(10, 0), 1_500);
    }

    #[test]
    fn jitter_stays_within_half_to_one_and_a_half() {
        let policy = RetryPolicy::default();
        for seed in 0..64 {
            let delay = policy.delay_for_attempt_ms(2, seed);
            assert!((500..=1_500).contains(&delay), "delay {delay} out of range");
        }
    }
}
