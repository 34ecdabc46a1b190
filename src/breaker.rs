//! Three-state circuit breaker keyed per backend, per `spec.md` §4.4.
//!
//! Breaker state is authoritative and wraps *outside* the rate limiter and
//! retry engine: a call that fails fast on an open circuit never touches
//! either.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::{ErrorKind, RouterError};
use crate::registry::CircuitState;

struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl Default for Breaker {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Mutex<Breaker>>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold,
            cooldown,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(5, Duration::from_secs(60))
    }

    pub fn current_state(&self, backend: &str) -> CircuitState {
        self.breakers
            .entry(backend.to_string())
            .or_default()
            .try_lock()
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Admits the call or fails fast with `circuit_open`. On `open`, checks
    /// whether the cooldown has elapsed and transitions to `half_open`
    /// (admitting exactly this one probe call) before returning.
    pub async fn guard(&self, backend: &str) -> Result<(), RouterError> {
        let entry = self.breakers.entry(backend.to_string()).or_default();
        let mut b = entry.lock().await;
        match b.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Err(RouterError::new(
                ErrorKind::CircuitOpen,
                "a probe call is already in flight",
            )),
            CircuitState::Open => {
                let elapsed = b.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
                if elapsed >= self.cooldown {
                    b.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(RouterError::new(ErrorKind::CircuitOpen, "circuit_open"))
                }
            }
        }
    }

    pub async fn on_success(&self, backend: &str) {
        let entry = self.breakers.entry(backend.to_string()).or_default();
        let mut b = entry.lock().await;
        b.state = CircuitState::Closed;
        b.consecutive_failures = 0;
        b.opened_at = None;
    }

    pub async fn on_failure(&self, backend: &str) {
        let entry = self.breakers.entry(backend.to_string()).or_default();
        let mut b = entry.lock().await;
        match b.state {
            CircuitState::HalfOpen => {
                b.state = CircuitState::Open;
                b.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                b.consecutive_failures += 1;
                if b.consecutive_failures >= self.failure_threshold {
                    b.state = CircuitState::Open;
                    b.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {
                b.opened_at = Some(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let reg = CircuitBreakerRegistry::new(5, Duration::from_secs(60));
        for _ in 0..4 {
            reg.guard("b").await.unwrap();
            reg.on_failure("b").await;
        }
        assert_eq!(reg.current_state("b"), CircuitState::Closed);
        reg.guard("b").await.unwrap();
        reg.on_failure("b").await;
        assert_eq!(reg.current_state("b"), CircuitState::Open);
        let err = reg.guard("b").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_and_resets() {
        let reg = CircuitBreakerRegistry::new(1, Duration::from_millis(10));
        reg.guard("b").await.unwrap();
        reg.on_failure("b").await;
        assert_eq!(reg.current_state("b"), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        reg.guard("b").await.unwrap();
        assert_eq!(reg.current_state("b"), CircuitState::HalfOpen);
        reg.on_success("b").await;
        assert_eq!(reg.current_state("b"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens_with_fresh_cooldown() {
        let reg = CircuitBreakerRegistry::new(1, Duration::from_millis(10));
        reg.guard("b").await.unwrap();
        reg.on_failure("b").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        reg.guard("b").await.unwrap();
        reg.on_failure("b").await;
        assert_eq!(reg.current_state("b"), CircuitState::Open);
        // Cooldown restarted: immediate retry still fails fast.
        let err = reg.guard("b").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
    }
}
