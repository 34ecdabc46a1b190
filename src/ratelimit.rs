//! Per-backend token bucket rate limiter with blocking, deadline-aware
//! acquire, per `spec.md` §4.2.
//!
//! Two buckets per backend (requests-per-minute, tokens-per-minute) are
//! owned by the adapter base (`adapter::AdapterRunner`); this module is the
//! bucket primitive itself plus the FIFO waiter queue.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::{ErrorKind, RouterError};

struct BucketState {
    tokens: f64,
    capacity: f64,
    rate_per_sec: f64,
    last_refill: Instant,
    next_ticket: u64,
    now_serving: u64,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// A single token bucket: `capacity` max tokens, refilled at `rate_per_sec`.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    notify: tokio::sync::Notify,
}

impl TokenBucket {
    pub fn new(capacity: f64, rate_per_sec: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                capacity,
                rate_per_sec,
                last_refill: Instant::now(),
                next_ticket: 0,
                now_serving: 0,
            }),
            notify: tokio::sync::Notify::new(),
        }
    }

    /// Blocks until `n` tokens are available or `deadline` elapses.
    /// FIFO: each caller takes a ticket and only attempts to drain the
    /// bucket once it is at the front of the queue, so concurrent callers
    /// are served in arrival order.
    pub async fn acquire(&self, n: f64, deadline: Option<Duration>) -> Result<(), RouterError> {
        let ticket = {
            let mut state = self.state.lock().await;
            let t = state.next_ticket;
            state.next_ticket += 1;
            t
        };

        let wait = async {
            loop {
                {
                    let mut state = self.state.lock().await;
                    if state.now_serving == ticket {
                        state.refill();
                        if state.tokens >= n {
                            state.tokens -= n;
                            state.now_serving += 1;
                            self.notify.notify_waiters();
                            return;
                        }
                    }
                }
                let notified = self.notify.notified();
                tokio::select! {
                    _ = notified => {}
                    _ = tokio::time::sleep(Duration::from_millis(20)) => {}
                }
            }
        };

        match deadline {
            Some(d) => timeout(d, wait).await.map_err(|_| {
                RouterError::new(
                    ErrorKind::RateLimit,
                    "rate_limit_wait_timeout".to_string(),
                )
            }),
            None => {
                wait.await;
                Ok(())
            }
        }
    }
}

/// The pair of buckets (RPM, TPM) a backend is rate-limited by.
pub struct BackendLimiter {
    pub requests: TokenBucket,
    pub tokens: TokenBucket,
}

impl BackendLimiter {
    pub fn new(requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self {
            requests: TokenBucket::new(requests_per_minute as f64, requests_per_minute as f64 / 60.0),
            tokens: TokenBucket::new(tokens_per_minute as f64, tokens_per_minute as f64 / 60.0),
        }
    }

    pub async fn acquire(&self, estimated_tokens: u32, deadline: Option<Duration>) -> Result<(), RouterError> {
        self.requests.acquire(1.0, deadline).await?;
        self.tokens.acquire(estimated_tokens as f64, deadline).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_succeeds_within_capacity() {
        let bucket = TokenBucket::new(5.0, 1.0);
        bucket.acquire(5.0, Some(Duration::from_millis(100))).await.unwrap();
    }

    #[tokio::test]
    async fn acquire_times_out_when_starved() {
        let bucket = TokenBucket::new(1.0, 0.001);
        bucket.acquire(1.0, Some(Duration::from_millis(50))).await.unwrap();
        let err = bucket
            .acquire(1.0, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimit);
    }

    #[tokio::test]
    async fn fifo_waiters_are_served_in_arrival_order() {
        let bucket = std::sync::Arc::new(TokenBucket::new(1.0, 1000.0));
        bucket.acquire(1.0, None).await.unwrap();

        let order = std::sync::Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let bucket = bucket.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                bucket.acquire(1.0, Some(Duration::from_secs(1))).await.unwrap();
                order.lock().await.push(i);
            }));
        }
        // Let all three queue up before the bucket refills.
        tokio::time::sleep(Duration::from_millis(10)).await;
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }
}
