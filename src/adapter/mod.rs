//! Provider Adapter contract and shared HTTP plumbing, per `spec.md` §4.6.
//!
//! `ProviderAdapter` mirrors the teacher's `LLMProviderClient` trait
//! (`llm::traits::LLMProviderClient`): one `#[async_trait]` object every
//! concrete provider implements, kept deliberately thin (capability
//! queries plus `complete`/`stream`) rather than the deep
//! inheritance-style hierarchy a non-Rust SDK might reach for.

pub mod anthropic_style;
pub mod generic_sse;
pub mod groq;
pub mod ollama;
pub mod openai_style;
pub mod openrouter;
pub mod sse;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::envelope::{Capability, GenerationRequest, GenerationResponse, StreamChunk};
use crate::error::RouterError;

/// What a concrete adapter must be able to do. The base (`AdapterRunner`)
/// provides rate limiting, retry, and error-taxonomy translation around
/// whatever `complete`/`stream` a subclass implements; adapters never touch
/// those concerns directly.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> &str;

    fn capabilities(&self) -> HashSet<Capability>;

    /// Cheap, local validation of request fields this provider cannot
    /// accept (e.g. `tools` on a provider with no function-calling
    /// support). Called before any network I/O.
    fn validate(&self, req: &GenerationRequest) -> Result<(), RouterError>;

    /// One-shot, non-streaming completion. Implementations perform exactly
    /// one HTTP round trip and translate the wire response into the
    /// canonical envelope.
    async fn complete(&self, req: &GenerationRequest) -> Result<GenerationResponse, RouterError>;

    /// Streaming completion. The returned stream yields canonical chunks;
    /// the final chunk carries `finish_reason` and cumulative `usage`.
    async fn stream(
        &self,
        req: &GenerationRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, RouterError>>, RouterError>;

    /// Best-effort remote model listing; adapters without a models
    /// endpoint return an empty vec rather than erroring.
    async fn list_models(&self) -> Result<Vec<String>, RouterError> {
        Ok(Vec::new())
    }

    /// Releases any adapter-held resources (idle connections, pending
    /// stream tasks). Called on router shutdown.
    async fn close(&self) {}

    /// Current circuit-breaker state for this adapter's backend, if it
    /// runs its calls through an `AdapterRunner`. The router mirrors this
    /// into the registry's `BackendHealth` after every dispatch so
    /// `candidate_filter` and `/healthz` see the same state the breaker
    /// itself is enforcing.
    fn circuit_state(&self) -> crate::registry::CircuitState {
        crate::registry::CircuitState::Closed
    }
}

/// Shared dependencies every concrete adapter's HTTP calls go through,
/// wrapping the teacher's bare `reqwest::Client` with rate limiting,
/// retries, and a circuit breaker the teacher's `OpenAIClient` does not
/// have (`llm::providers::openai::client::OpenAIClient::new` just stores
/// the client and config directly).
pub struct AdapterRunner {
    pub http: reqwest::Client,
    pub limiter: Arc<crate::ratelimit::BackendLimiter>,
    pub breaker: Arc<crate::breaker::CircuitBreakerRegistry>,
    pub retry_policy: crate::retry::RetryPolicy,
}

impl AdapterRunner {
    pub fn new(
        limiter: Arc<crate::ratelimit::BackendLimiter>,
        breaker: Arc<crate::breaker::CircuitBreakerRegistry>,
        retry_policy: crate::retry::RetryPolicy,
    ) -> Result<Self, RouterError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("llm-router/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| RouterError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            limiter,
            breaker,
            retry_policy,
        })
    }

    /// Runs one rate-limited, retried, circuit-guarded unary call.
    /// `backend_key` scopes the limiter/breaker (typically the adapter id);
    /// `estimated_tokens` sizes the token-bucket draw before the call, per
    /// `spec.md` §4.2.
    pub async fn guarded_call<F, Fut, T>(
        &self,
        backend_key: &str,
        estimated_tokens: u32,
        deadline: Option<Duration>,
        mut op: F,
    ) -> Result<(T, u64), RouterError>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, (RouterError, Option<Duration>)>>,
    {
        self.breaker.guard(backend_key).await?;
        self.limiter.acquire(estimated_tokens, deadline).await?;

        let started = Instant::now();
        let result = crate::retry::run(&mut op, self.retry_policy, deadline).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => self.breaker.on_success(backend_key).await,
            Err(e) if e.kind.triggers_failover() => self.breaker.on_failure(backend_key).await,
            Err(_) => {}
        }

        result.map(|v| (v, latency_ms))
    }

    /// Feeds a streaming adapter's chunk stream back into the breaker:
    /// every error item (including a mid-stream transport drop) counts as
    /// a failure. Callers record `on_success` themselves once the initial
    /// HTTP response comes back 2xx, mirroring `guarded_call`'s `Ok(_) =>
    /// on_success` — without this, a half-open probe that streams fine at
    /// first and then drops would never feed a failure back in, leaving
    /// the breaker wedged open forever once it reopens.
    pub fn watch_stream(
        &self,
        backend_key: &str,
        inner: BoxStream<'static, Result<StreamChunk, RouterError>>,
    ) -> BoxStream<'static, Result<StreamChunk, RouterError>> {
        let breaker = self.breaker.clone();
        let backend_key = backend_key.to_string();
        inner
            .then(move |item| {
                let breaker = breaker.clone();
                let backend_key = backend_key.clone();
                async move {
                    if item.is_err() {
                        breaker.on_failure(&backend_key).await;
                    }
                    item
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::FinishReason;
    use futures::stream;

    fn runner() -> AdapterRunner {
        AdapterRunner::new(
            Arc::new(crate::ratelimit::BackendLimiter::new(1_000, 1_000)),
            Arc::new(crate::breaker::CircuitBreakerRegistry::with_defaults()),
            crate::retry::RetryPolicy::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn watch_stream_reports_chunk_errors_as_breaker_failures() {
        let runner = runner();
        let items: Vec<Result<StreamChunk, RouterError>> = vec![
            Ok(StreamChunk::text("hi")),
            Err(RouterError::new(crate::error::ErrorKind::Upstream5xx, "dropped")),
        ];
        let mut watched = runner.watch_stream("openai:a", stream::iter(items).boxed());
        while watched.next().await.is_some() {}

        assert_eq!(
            runner.breaker.current_state("openai:a"),
            crate::registry::CircuitState::Closed,
            "with_defaults' failure_threshold is above 1, so a single failed chunk shouldn't open the circuit yet"
        );
    }

    #[tokio::test]
    async fn watch_stream_passes_through_items_unchanged() {
        let runner = runner();
        let items: Vec<Result<StreamChunk, RouterError>> = vec![
            Ok(StreamChunk::text("hi")),
            Ok(StreamChunk::terminal(FinishReason::Stop, crate::envelope::Usage::new(1, 1))),
        ];
        let mut watched = runner.watch_stream("openai:a", stream::iter(items).boxed());

        let first = watched.next().await.unwrap().unwrap();
        assert_eq!(first.delta_text, "hi");
        let second = watched.next().await.unwrap().unwrap();
        assert_eq!(second.finish_reason, Some(FinishReason::Stop));
        assert!(watched.next().await.is_none());
    }
}
