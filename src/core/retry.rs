//! Bounded-attempt retry executor.
//!
//! Runs a unit of work until it succeeds, fails with a non-retryable error,
//! or spends the attempt budget of a [`RetryPolicy`]. The final failure is
//! handed to a catch function exactly once and never re-raised.

use crate::config::RetryPolicy;
use crate::error::{AnvilError, AnvilResult};
use crate::metrics::{MetricsSink, Tags};
use crate::utils::calculate_backoff;
use std::future::Future;
use tokio::time::sleep;

/// Labels and logging context for one retried unit of work.
#[derive(Debug, Clone, Copy)]
pub struct RetrySpec<'a> {
    /// Prefix for the `.retry` and `.error` counters
    pub metric_name: &'a str,
    /// Tags attached to those counters
    pub tags: Tags<'a>,
    /// Free-form context included in retry logs
    pub context: &'a str,
}

/// How a retried unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The work succeeded on attempt `attempts`
    Succeeded {
        /// Attempts made, including the successful one
        attempts: u32,
    },
    /// The work never succeeded; the catch function has run
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
}

impl RetryOutcome {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RetryOutcome::Succeeded { .. } => "success",
            RetryOutcome::Exhausted { .. } => "exhausted",
        }
    }

    /// Number of attempts made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts } | RetryOutcome::Exhausted { attempts } => {
                *attempts
            }
        }
    }
}

/// Run `try_fn` under `policy`, retrying only errors that report themselves
/// retryable.
///
/// `try_fn` receives the 1-based attempt number. `catch_fn` runs exactly once
/// if the work never succeeds, with [`AnvilError::RetryBudgetExhausted`]
/// wrapping the last error.
pub async fn retry_if_retryable<F, Fut, C>(
    policy: &RetryPolicy,
    metrics: &dyn MetricsSink,
    spec: RetrySpec<'_>,
    mut try_fn: F,
    catch_fn: C,
) -> RetryOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AnvilResult<()>>,
    C: FnOnce(AnvilError),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match try_fn(attempt).await {
            Ok(()) => {
                if attempt > 1 {
                    tracing::info!(
                        metric = spec.metric_name,
                        attempt,
                        "Succeeded after retry"
                    );
                }
                return RetryOutcome::Succeeded { attempts: attempt };
            }
            Err(error) => error,
        };

        if error.is_retryable() && attempt < max_attempts {
            let backoff = calculate_backoff(policy, attempt);
            tracing::warn!(
                metric = spec.metric_name,
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                context = spec.context,
                "Attempt failed, retrying: {}",
                error
            );
            metrics.increment(&format!("{}.retry", spec.metric_name), spec.tags);
            sleep(backoff).await;
            attempt += 1;
            continue;
        }

        metrics.increment(&format!("{}.error", spec.metric_name), spec.tags);
        catch_fn(AnvilError::RetryBudgetExhausted {
            attempts: attempt,
            last_error: Box::new(error),
        });
        return RetryOutcome::Exhausted { attempts: attempt };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordingMetrics;
    use std::cell::Cell;

    const SPEC: RetrySpec<'static> = RetrySpec {
        metric_name: "unit",
        tags: &[("serverMode", "test")],
        context: "{}",
    };

    fn retryable() -> AnvilError {
        AnvilError::NoBackendAvailable {
            job_name: "unit".to_string(),
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let metrics = RecordingMetrics::new();
        let caught = Cell::new(0);

        let outcome = retry_if_retryable(
            &RetryPolicy::fixed(3, 1),
            &metrics,
            SPEC,
            |_attempt| async { Ok(()) },
            |_e| caught.set(caught.get() + 1),
        )
        .await;

        assert_eq!(outcome, RetryOutcome::Succeeded { attempts: 1 });
        assert_eq!(caught.get(), 0);
        assert!(metrics.events().is_empty());
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let metrics = RecordingMetrics::new();
        let outcome = retry_if_retryable(
            &RetryPolicy::fixed(5, 1),
            &metrics,
            SPEC,
            |attempt| async move { if attempt < 3 { Err(retryable()) } else { Ok(()) } },
            |_e| panic!("catch must not run"),
        )
        .await;

        assert_eq!(outcome, RetryOutcome::Succeeded { attempts: 3 });
        assert_eq!(metrics.count("unit.retry"), 2);
        assert_eq!(metrics.count("unit.error"), 0);
    }

    #[tokio::test]
    async fn test_catch_runs_once_after_budget() {
        let metrics = RecordingMetrics::new();
        let calls = Cell::new(0);
        let mut caught = Vec::new();

        let outcome = retry_if_retryable(
            &RetryPolicy::fixed(3, 1),
            &metrics,
            SPEC,
            |_attempt| {
                calls.set(calls.get() + 1);
                async { Err(retryable()) }
            },
            |e| caught.push(e),
        )
        .await;

        assert_eq!(outcome, RetryOutcome::Exhausted { attempts: 3 });
        assert_eq!(outcome.label(), "exhausted");
        assert_eq!(calls.get(), 3);
        assert_eq!(caught.len(), 1);
        assert!(matches!(
            caught[0],
            AnvilError::RetryBudgetExhausted { attempts: 3, .. }
        ));
        assert_eq!(metrics.count("unit.retry"), 2);
        assert_eq!(metrics.count("unit.error"), 1);
        assert_eq!(metrics.named("unit.error")[0].tag("serverMode"), Some("test"));
    }

    #[tokio::test]
    async fn test_non_retryable_error_skips_retries() {
        let metrics = RecordingMetrics::new();
        let calls = Cell::new(0);
        let caught = Cell::new(0);

        let outcome = retry_if_retryable(
            &RetryPolicy::fixed(5, 1),
            &metrics,
            SPEC,
            |_attempt| {
                calls.set(calls.get() + 1);
                async { Err(AnvilError::config("broken")) }
            },
            |_e| caught.set(caught.get() + 1),
        )
        .await;

        assert_eq!(outcome.attempts(), 1);
        assert_eq!(calls.get(), 1);
        assert_eq!(caught.get(), 1);
        assert_eq!(metrics.count("unit.retry"), 0);
    }

    #[tokio::test]
    async fn test_zero_budget_still_tries_once() {
        let metrics = RecordingMetrics::new();
        let mut policy = RetryPolicy::fixed(0, 1);
        policy.max_attempts = 0;
        let calls = Cell::new(0);

        let outcome = retry_if_retryable(
            &policy,
            &metrics,
            SPEC,
            |_attempt| {
                calls.set(calls.get() + 1);
                async { Err(retryable()) }
            },
            |_e| {},
        )
        .await;

        assert_eq!(outcome, RetryOutcome::Exhausted { attempts: 1 });
        assert_eq!(calls.get(), 1);
    }
}
