//! Linear-backoff retry for transient operations
//!
//! Attempt `n` failing schedules a wait of `base_delay * n` before the next
//! try. When every attempt fails the last error is returned unchanged so
//! callers see the real cause, not a wrapper.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::metrics;

/// How many times to try and how long to back off between tries
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// Run `op` until it succeeds or the attempt budget is spent
pub async fn run_with_retry<T, E, F, Fut>(
    operation: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= max_attempts {
                    return Err(error);
                }
                let delay = policy.base_delay * attempt;
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation, attempt, max_attempts, delay, error
                );
                metrics::record_retry(operation);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test]
    async fn returns_first_success_without_sleeping() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<u32, String> =
            run_with_retry("test op", RetryPolicy::default(), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_linearly_with_attempt_number() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();
        let result: Result<u32, String> =
            run_with_retry("test op", RetryPolicy::default(), move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("boom {n}"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1000ms after the first failure plus 2000ms after the second
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_the_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<u32, String> =
            run_with_retry("test op", RetryPolicy::default(), move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err::<u32, _>(format!("boom {n}"))
                }
            })
            .await;
        assert_eq!(result, Err("boom 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempt_budget_still_runs_once() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        let result: Result<u32, String> =
            run_with_retry("test op", policy, || async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
