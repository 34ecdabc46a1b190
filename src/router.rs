//! Router core: strategy-driven candidate selection, fallback chain, cache
//! and cost-ledger wiring, per `spec.md` §4.10.
//!
//! Grounded in the teacher's `llm::router::LLMRouter`, which holds its
//! providers and health state behind `Arc`s so the router itself is cheap
//! to clone and share across request-handling tasks; the fallback-walk
//! here replaces the teacher's single-provider dispatch with an ordered
//! attempt list.

use dashmap::DashMap;
use futures::StreamExt;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Instant;

use crate::adapter::ProviderAdapter;
use crate::cache::ResponseCache;
use crate::cost::CostLedger;
use crate::credentials::CredentialStore;
use crate::envelope::{GenerationRequest, GenerationResponse, StreamChunk};
use crate::error::{CandidateFailure, ErrorKind, RouterError};
use crate::registry::ModelRegistry;
use crate::strategy::{candidate_filter, rank, rank_by_live_latency, Strategy};

/// Everything `Router::generate`/`::stream` needs, assembled once at boot
/// by the CLI's `serve` command and shared (via `Arc<Router>`) across every
/// Axum handler.
pub struct Router {
    registry: Arc<ModelRegistry>,
    adapters: DashMap<String, Arc<dyn ProviderAdapter>>,
    cache: Arc<ResponseCache>,
    cost_ledger: Arc<CostLedger>,
    credentials: Arc<CredentialStore>,
    strategy: std::sync::RwLock<Strategy>,
    round_robin_cursor: AtomicUsize,
}

impl Router {
    pub fn new(
        registry: Arc<ModelRegistry>,
        cache: Arc<ResponseCache>,
        cost_ledger: Arc<CostLedger>,
        credentials: Arc<CredentialStore>,
        strategy: Strategy,
    ) -> Self {
        Self {
            registry,
            adapters: DashMap::new(),
            cache,
            cost_ledger,
            credentials,
            strategy: std::sync::RwLock::new(strategy),
            round_robin_cursor: AtomicUsize::new(0),
        }
    }

    pub fn set_strategy(&self, strategy: Strategy) {
        *self.strategy.write().unwrap() = strategy;
    }

    pub fn list_models(&self) -> Vec<crate::registry::ModelDescriptor> {
        self.registry.list()
    }

    pub fn health_of(&self, model_id: &str) -> crate::registry::BackendHealth {
        self.registry.health_of(model_id)
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.cost_ledger.total_usd()
    }

    /// Registers a model descriptor and binds it to the adapter instance
    /// that will serve it. One adapter instance may back several models
    /// (e.g. one `OpenAiStyleAdapter` serving every OpenAI model).
    pub fn register_model(
        &self,
        desc: crate::registry::ModelDescriptor,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<(), RouterError> {
        let id = desc.id.clone();
        self.registry.register(desc)?;
        self.adapters.insert(id, adapter);
        Ok(())
    }

    fn ordered_candidates(&self, req: &GenerationRequest) -> Vec<String> {
        let snapshot = self.registry.snapshot();
        let credentials = self.credentials.clone();
        let survivors = candidate_filter(
            &snapshot,
            req,
            |provider_tag| credentials.contains(provider_tag),
            &[],
        );
        let strategy = *self.strategy.read().unwrap();
        if strategy == Strategy::SpeedPriority {
            rank_by_live_latency(&snapshot, survivors)
        } else {
            rank(strategy, &snapshot, survivors, &self.round_robin_cursor)
        }
    }

    /// `spec.md` §4.10: non-streaming path, cache-wrapped when the
    /// request is cacheable.
    pub async fn generate(&self, req: GenerationRequest) -> Result<GenerationResponse, RouterError> {
        req.validate()?;

        let candidates = self.ordered_candidates(&req);

        if ResponseCache::is_cacheable(&req) {
            if let Some(model_id) = candidates.first() {
                let fingerprint = ResponseCache::fingerprint(model_id, &req);
                match self.cache.get_or_begin(&fingerprint).await {
                    Ok(mut cached) => {
                        cached.cached = true;
                        return Ok(cached);
                    }
                    Err(guard) => {
                        let response = self.dispatch(req, candidates).await?;
                        guard.complete(response.clone()).await;
                        return Ok(response);
                    }
                }
            }
        }

        self.dispatch(req, candidates).await
    }

    /// Ranks candidates exactly once per `generate`/`stream` call: a
    /// strategy like `RoundRobin` advances shared state (its cursor) on
    /// every call to `ordered_candidates`, so computing it twice — once
    /// for the cache fingerprint, once for dispatch — would silently
    /// advance the rotation an extra step per cacheable request.
    async fn dispatch(
        &self,
        req: GenerationRequest,
        candidates: Vec<String>,
    ) -> Result<GenerationResponse, RouterError> {
        if candidates.is_empty() {
            return Err(RouterError::no_candidate_succeeded(Vec::new()));
        }

        let mut cause_chain = Vec::new();
        for model_id in &candidates {
            let Some(adapter) = self.adapters.get(model_id).map(|a| a.clone()) else {
                continue;
            };
            let Some(descriptor) = self.registry.get(model_id) else {
                continue;
            };

            if let Some(ceiling) = req.cost_ceiling {
                let estimated = CostLedger::estimate(&descriptor, &req);
                if let Err(e) = self.cost_ledger.check_ceiling(estimated, Some(ceiling)) {
                    cause_chain.push(CandidateFailure {
                        model_id: model_id.clone(),
                        provider: descriptor.provider_tag.clone(),
                        kind: e.kind,
                        message: e.message.clone(),
                    });
                    continue;
                }
            }

            let mut scoped = req.clone();
            scoped.model_hint = Some(model_id.clone());

            let started = Instant::now();
            match adapter.complete(&scoped).await {
                Ok(mut response) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.registry.update_health(model_id, true, latency_ms);
                    self.registry.set_circuit_state(model_id, adapter.circuit_state());
                    let cost = CostLedger::actual(&descriptor, &response.usage);
                    self.cost_ledger.record(model_id, req.user_tag.as_deref(), cost);
                    response.cost_usd = cost;
                    return Ok(response);
                }
                Err(err) => {
                    self.registry.update_health(model_id, false, started.elapsed().as_millis() as u64);
                    self.registry.set_circuit_state(model_id, adapter.circuit_state());
                    let failover = err.kind.triggers_failover();
                    cause_chain.push(CandidateFailure {
                        model_id: model_id.clone(),
                        provider: descriptor.provider_tag.clone(),
                        kind: err.kind,
                        message: err.message.clone(),
                    });
                    if !failover {
                        let mut err = err;
                        err.cause_chain = cause_chain;
                        return Err(err);
                    }
                }
            }
        }

        Err(RouterError::no_candidate_succeeded(cause_chain))
    }

    /// `spec.md` §4.10: streaming path. Only attempts the single top
    /// candidate — mid-stream failover would double-deliver partial text
    /// to the caller, so a stream failure is terminal rather than
    /// triggering the fallback chain.
    pub async fn stream(
        &self,
        req: GenerationRequest,
    ) -> Result<futures::stream::BoxStream<'static, Result<StreamChunk, RouterError>>, RouterError> {
        req.validate()?;
        let candidates = self.ordered_candidates(&req);
        let model_id = candidates
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::no_candidate_succeeded(Vec::new()))?;
        let adapter = self
            .adapters
            .get(&model_id)
            .map(|a| a.clone())
            .ok_or_else(|| RouterError::internal("registered model has no bound adapter"))?;
        let descriptor = self
            .registry
            .get(&model_id)
            .ok_or_else(|| RouterError::internal("registered model missing from registry"))?;

        let mut scoped = req.clone();
        scoped.model_hint = Some(model_id.clone());

        let inner = adapter.stream(&scoped).await?;
        let registry = self.registry.clone();
        let cost_ledger = self.cost_ledger.clone();
        let user_tag = req.user_tag.clone();
        let started = Instant::now();
        let model_id_for_stream = model_id.clone();
        let adapter_for_stream = adapter.clone();

        let wrapped = inner.map(move |item| match &item {
            Ok(chunk) if chunk.finish_reason.is_some() => {
                let latency_ms = started.elapsed().as_millis() as u64;
                registry.update_health(&model_id_for_stream, true, latency_ms);
                registry.set_circuit_state(&model_id_for_stream, adapter_for_stream.circuit_state());
                if let Some(usage) = chunk.usage {
                    let cost = CostLedger::actual(&descriptor, &usage);
                    cost_ledger.record(&model_id_for_stream, user_tag.as_deref(), cost);
                }
                item
            }
            Err(_) => {
                registry.update_health(&model_id_for_stream, false, started.elapsed().as_millis() as u64);
                registry.set_circuit_state(&model_id_for_stream, adapter_for_stream.circuit_state());
                item
            }
            _ => item,
        });

        Ok(wrapped.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Capability, ChatMessage, FinishReason, Role, Usage};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubAdapter {
        id: String,
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn id(&self) -> &str {
            &self.id
        }
        fn capabilities(&self) -> HashSet<Capability> {
            HashSet::from([Capability::Chat])
        }
        fn validate(&self, _req: &GenerationRequest) -> Result<(), RouterError> {
            Ok(())
        }
        async fn complete(&self, req: &GenerationRequest) -> Result<GenerationResponse, RouterError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(RouterError::new(ErrorKind::Upstream5xx, "down"));
            }
            Ok(GenerationResponse {
                text: "hi".to_string(),
                model_id: req.model_hint.clone().unwrap(),
                provider: "stub".to_string(),
                usage: Usage::new(1, 1),
                cost_usd: 0.0,
                finish_reason: FinishReason::Stop,
                latency_ms: 1,
                cached: false,
                metadata: Default::default(),
                created_at: chrono::Utc::now(),
            })
        }
        async fn stream(
            &self,
            _req: &GenerationRequest,
        ) -> Result<futures::stream::BoxStream<'static, Result<StreamChunk, RouterError>>, RouterError> {
            unimplemented!()
        }
    }

    struct StateReportingAdapter {
        id: String,
        state: std::sync::Mutex<crate::registry::CircuitState>,
    }

    #[async_trait]
    impl ProviderAdapter for StateReportingAdapter {
        fn id(&self) -> &str {
            &self.id
        }
        fn capabilities(&self) -> HashSet<Capability> {
            HashSet::from([Capability::Chat])
        }
        fn validate(&self, _req: &GenerationRequest) -> Result<(), RouterError> {
            Ok(())
        }
        async fn complete(&self, _req: &GenerationRequest) -> Result<GenerationResponse, RouterError> {
            *self.state.lock().unwrap() = crate::registry::CircuitState::Open;
            Err(RouterError::new(ErrorKind::Upstream5xx, "down"))
        }
        async fn stream(
            &self,
            _req: &GenerationRequest,
        ) -> Result<futures::stream::BoxStream<'static, Result<StreamChunk, RouterError>>, RouterError> {
            unimplemented!()
        }
        fn circuit_state(&self) -> crate::registry::CircuitState {
            *self.state.lock().unwrap()
        }
    }

    fn model(id: &str, quality: f32) -> crate::registry::ModelDescriptor {
        crate::registry::ModelDescriptor {
            id: id.to_string(),
            provider_tag: "openai".to_string(),
            capabilities: HashSet::from([Capability::Chat]),
            context_window: 8192,
            input_price_per_million: 1.0,
            output_price_per_million: 2.0,
            default_max_tokens: 1024,
            quality_score: Some(quality),
            speed_score: Some(0.5),
        }
    }

    fn chat_request() -> GenerationRequest {
        GenerationRequest::new_chat(
            vec![ChatMessage { role: Role::User, content: "hi".into() }],
            64,
        )
    }

    fn setup_router() -> Router {
        let registry = Arc::new(ModelRegistry::new());
        let cache = ResponseCache::new(1_000_000, std::time::Duration::from_secs(60));
        let cost_ledger = Arc::new(CostLedger::new());
        let credentials = Arc::new(CredentialStore::new());
        credentials.insert("openai", "sk-test", None);
        Router::new(registry, cache, cost_ledger, credentials, Strategy::QualityFirst)
    }

    #[tokio::test]
    async fn happy_path_returns_response_from_best_candidate() {
        let router = setup_router();
        router
            .register_model(
                model("openai:good", 0.9),
                Arc::new(StubAdapter { id: "openai:good".into(), fail_times: AtomicU32::new(0) }),
            )
            .unwrap();

        let resp = router.generate(chat_request()).await.unwrap();
        assert_eq!(resp.model_id, "openai:good");
    }

    #[tokio::test]
    async fn failover_walks_to_next_candidate_on_upstream_5xx() {
        let router = setup_router();
        router
            .register_model(
                model("openai:a", 0.9),
                Arc::new(StubAdapter { id: "openai:a".into(), fail_times: AtomicU32::new(99) }),
            )
            .unwrap();
        router
            .register_model(
                model("openai:b", 0.1),
                Arc::new(StubAdapter { id: "openai:b".into(), fail_times: AtomicU32::new(0) }),
            )
            .unwrap();

        let resp = router.generate(chat_request()).await.unwrap();
        assert_eq!(resp.model_id, "openai:b");
    }

    #[tokio::test]
    async fn exhaustion_returns_no_candidate_succeeded_with_cause_chain() {
        let router = setup_router();
        router
            .register_model(
                model("openai:a", 0.9),
                Arc::new(StubAdapter { id: "openai:a".into(), fail_times: AtomicU32::new(99) }),
            )
            .unwrap();

        let err = router.generate(chat_request()).await.unwrap_err();
        assert_eq!(err.cause_chain.len(), 1);
        assert_eq!(err.cause_chain[0].kind, ErrorKind::Upstream5xx);
    }

    #[tokio::test]
    async fn dispatch_mirrors_adapter_circuit_state_into_the_registry() {
        let router = setup_router();
        router
            .register_model(
                model("openai:a", 0.9),
                Arc::new(StateReportingAdapter {
                    id: "openai:a".into(),
                    state: std::sync::Mutex::new(crate::registry::CircuitState::Closed),
                }),
            )
            .unwrap();

        assert_eq!(
            router.health_of("openai:a").circuit_state,
            crate::registry::CircuitState::Closed
        );
        let _ = router.generate(chat_request()).await;
        assert_eq!(
            router.health_of("openai:a").circuit_state,
            crate::registry::CircuitState::Open,
            "dispatch must mirror the adapter's real breaker state into the registry, not leave it at its default"
        );
    }

    #[tokio::test]
    async fn cache_hit_skips_the_adapter_entirely() {
        let router = setup_router();
        router
            .register_model(
                model("openai:a", 0.9),
                Arc::new(StubAdapter { id: "openai:a".into(), fail_times: AtomicU32::new(0) }),
            )
            .unwrap();

        let req = chat_request();
        let first = router.generate(req.clone()).await.unwrap();
        assert!(!first.cached);
        let second = router.generate(req).await.unwrap();
        assert!(second.cached);
    }
}
