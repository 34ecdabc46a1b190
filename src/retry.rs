//! Exponential backoff with jitter and retryable classification, per
//! `spec.md` §4.3.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::RouterError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(d) = retry_after {
            return d;
        }
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter_span = capped * self.jitter;
        let jittered = rand::thread_rng().gen_range((capped - jitter_span).max(0.0)..=(capped + jitter_span));
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Runs `op`, retrying on a retryable [`RouterError`] up to
/// `policy.max_attempts` times. `op` may set `retry_after` on the error it
/// returns (mirroring a provider's `Retry-After` header) to override the
/// computed backoff. The sleep is raced against `deadline` so cancellation
/// preempts it immediately.
pub async fn run<F, Fut, T>(
    mut op: F,
    policy: RetryPolicy,
    deadline: Option<Duration>,
) -> Result<T, RouterError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, (RouterError, Option<Duration>)>>,
{
    let mut attempt = 0;
    loop {
        let result = op(attempt).await;
        match result {
            Ok(value) => return Ok(value),
            Err((err, retry_after)) => {
                attempt += 1;
                if !err.is_retryable() || attempt >= policy.max_attempts {
                    return Err(err.with_attempts(attempt));
                }
                let delay = policy.delay_for(attempt - 1, retry_after);
                let sleep = tokio::time::sleep(delay);
                match deadline {
                    Some(d) => {
                        if timeout(d, sleep).await.is_err() {
                            return Err(err.with_attempts(attempt));
                        }
                    }
                    None => sleep.await,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_without_retry_when_op_succeeds_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<i32, RouterError> = run(
            move |_attempt| {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            },
            RetryPolicy::default(),
            None,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts_then_gives_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
        };
        let result: Result<i32, RouterError> = run(
            move |_attempt| {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err((RouterError::new(ErrorKind::Upstream5xx, "boom"), None))
                }
            },
            policy,
            None,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_stop_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<i32, RouterError> = run(
            move |_attempt| {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err((RouterError::new(ErrorKind::InvalidRequest, "bad"), None))
                }
            },
            RetryPolicy::default(),
            None,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_preempts_the_sleep() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        };
        let start = std::time::Instant::now();
        let result: Result<i32, RouterError> = run(
            move |_attempt| async move {
                Err((RouterError::new(ErrorKind::Timeout, "slow"), None))
            },
            policy,
            Some(Duration::from_millis(10)),
        )
        .await;
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
