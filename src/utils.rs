//! Support functions shared across AnvilQ.

use crate::config::{BackoffStrategy, RetryPolicy};
use std::time::Duration;

/// Delay to wait before retry number `attempt` (1-based: the delay after the
/// first failed attempt is `calculate_backoff(policy, 1)`).
///
/// With the `jitter` feature and `enable_jitter` set, up to 25% of the delay is
/// added at random. The result never exceeds `max_delay_ms`.
pub fn calculate_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let step = attempt.saturating_sub(1);
    let base = policy.base_delay_ms as f64;

    let delay_ms = match &policy.backoff_strategy {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Linear { increment_ms } => {
            base + (*increment_ms as f64) * f64::from(step)
        }
        BackoffStrategy::Exponential { multiplier } => {
            base * multiplier.max(1.0).powi(step.min(i32::MAX as u32) as i32)
        }
    };

    // float-to-int casts saturate, so huge exponents land on u64::MAX
    let jittered = apply_jitter(delay_ms.max(0.0) as u64, policy.enable_jitter);
    Duration::from_millis(jittered.min(policy.max_delay_ms))
}

#[cfg(feature = "jitter")]
fn apply_jitter(delay_ms: u64, enabled: bool) -> u64 {
    if !enabled || delay_ms == 0 {
        return delay_ms;
    }
    let spread = (delay_ms / 4).max(1);
    delay_ms.saturating_add(rand::random::<u64>() % spread)
}

#[cfg(not(feature = "jitter"))]
fn apply_jitter(delay_ms: u64, _enabled: bool) -> u64 {
    delay_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(mut policy: RetryPolicy) -> RetryPolicy {
        policy.enable_jitter = false;
        policy
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = RetryPolicy::fixed(3, 250);
        assert_eq!(calculate_backoff(&policy, 1), Duration::from_millis(250));
        assert_eq!(calculate_backoff(&policy, 5), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_backoff_grows_and_caps() {
        let policy = no_jitter(RetryPolicy::exponential(10));
        assert_eq!(calculate_backoff(&policy, 1), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(&policy, 2), Duration::from_millis(2000));
        assert_eq!(calculate_backoff(&policy, 3), Duration::from_millis(4000));
        assert_eq!(calculate_backoff(&policy, 20), Duration::from_millis(60000));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = no_jitter(RetryPolicy::linear(5));
        assert_eq!(calculate_backoff(&policy, 1), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(&policy, 3), Duration::from_millis(3000));
    }

    #[test]
    fn test_jitter_never_exceeds_max_delay() {
        let policy = RetryPolicy::exponential(10);
        assert!(policy.enable_jitter);
        for _ in 0..200 {
            let delay = calculate_backoff(&policy, 30);
            assert!(delay <= Duration::from_millis(policy.max_delay_ms));
            assert!(delay >= Duration::from_millis(policy.max_delay_ms));
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::exponential(3);
        for _ in 0..50 {
            let delay = calculate_backoff(&policy, 2);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(2500));
        }
    }
}
