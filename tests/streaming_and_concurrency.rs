//! Cross-module end-to-end scenarios from `spec.md` §8 that don't fit
//! naturally as a unit test co-located with a single module: stream
//! cancellation and router-level concurrent single-flight. Stub adapters
//! only, no network I/O, matching the teacher's own integration-test style
//! of exercising the public API from outside the crate.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use llm_router::adapter::ProviderAdapter;
use llm_router::cache::ResponseCache;
use llm_router::config::KNOWN_PROVIDER_TAGS;
use llm_router::cost::CostLedger;
use llm_router::credentials::CredentialStore;
use llm_router::registry::ModelRegistry;
use llm_router::{
    Capability, ChatMessage, ErrorKind, FinishReason, GenerationRequest, GenerationResponse, Role, Router,
    RouterError, Strategy, StreamChunk, Usage,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CountingStreamAdapter {
    id: String,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl ProviderAdapter for CountingStreamAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::Chat, Capability::Streaming])
    }

    fn validate(&self, _req: &GenerationRequest) -> Result<(), RouterError> {
        Ok(())
    }

    async fn complete(&self, req: &GenerationRequest) -> Result<GenerationResponse, RouterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Slow enough that ten concurrent callers genuinely overlap.
        tokio::time::sleep(Duration::from_millis(40)).await;
        Ok(GenerationResponse {
            text: "hi".to_string(),
            model_id: req.model_hint.clone().unwrap(),
            provider: "stub".to_string(),
            usage: Usage::new(1, 1),
            cost_usd: 0.0,
            finish_reason: FinishReason::Stop,
            latency_ms: 40,
            cached: false,
            metadata: Default::default(),
            created_at: chrono::Utc::now(),
        })
    }

    async fn stream(
        &self,
        _req: &GenerationRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, RouterError>>, RouterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // An endless SSE emitting one chunk every 100ms, per scenario 6.
        let s = stream::unfold(0_u32, |n| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Some((Ok(StreamChunk::text(format!("chunk-{n}"))), n + 1))
        });
        Ok(s.boxed())
    }
}

fn model(id: &str) -> llm_router::registry::ModelDescriptor {
    llm_router::registry::ModelDescriptor {
        id: id.to_string(),
        provider_tag: "openai".to_string(),
        capabilities: HashSet::from([Capability::Chat, Capability::Streaming]),
        context_window: 8192,
        input_price_per_million: 1.0,
        output_price_per_million: 2.0,
        default_max_tokens: 1024,
        quality_score: Some(0.9),
        speed_score: Some(0.5),
    }
}

fn chat_request() -> GenerationRequest {
    GenerationRequest::new_chat(vec![ChatMessage { role: Role::User, content: "hi".into() }], 64)
}

fn setup_router() -> Router {
    let registry = Arc::new(ModelRegistry::new());
    let cache = ResponseCache::new(1_000_000, Duration::from_secs(60));
    let cost_ledger = Arc::new(CostLedger::new());
    let credentials = Arc::new(CredentialStore::load_from_env(KNOWN_PROVIDER_TAGS));
    credentials.insert("openai", "sk-test", None);
    Router::new(registry, cache, cost_ledger, credentials, Strategy::QualityFirst)
}

#[tokio::test]
async fn ten_concurrent_identical_requests_invoke_the_adapter_once() {
    let router = Arc::new(setup_router());
    let calls = Arc::new(AtomicU32::new(0));
    router
        .register_model(model("openai:a"), Arc::new(CountingStreamAdapter { id: "openai:a".into(), calls: calls.clone() }))
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let router = router.clone();
        handles.push(tokio::spawn(async move { router.generate(chat_request()).await.unwrap() }));
    }
    let results: Vec<_> = futures::future::join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for r in &results {
        assert_eq!(r.text, "hi");
    }
}

#[tokio::test]
async fn stream_cancel_stops_receiving_chunks_after_drop() {
    let router = setup_router();
    let calls = Arc::new(AtomicU32::new(0));
    router
        .register_model(model("openai:a"), Arc::new(CountingStreamAdapter { id: "openai:a".into(), calls }))
        .unwrap();

    let mut req = chat_request();
    req.stream = true;
    let mut chunk_stream = router.stream(req).await.unwrap();

    let mut received = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(250);
    while tokio::time::Instant::now() < deadline {
        if let Some(Ok(_)) = chunk_stream.next().await {
            received += 1;
        }
    }
    drop(chunk_stream);

    assert!(received >= 2, "expected at least two chunks before cancellation, got {received}");
}

#[tokio::test]
async fn missing_credential_surfaces_as_no_candidate_succeeded() {
    let registry = Arc::new(ModelRegistry::new());
    let cache = ResponseCache::new(1_000_000, Duration::from_secs(60));
    let cost_ledger = Arc::new(CostLedger::new());
    let credentials = Arc::new(CredentialStore::new());
    let router = Router::new(registry, cache, cost_ledger, credentials, Strategy::QualityFirst);

    router
        .register_model(model("openai:a"), Arc::new(CountingStreamAdapter { id: "openai:a".into(), calls: Arc::new(AtomicU32::new(0)) }))
        .unwrap();

    let err = router.generate(chat_request()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);
    assert!(err.cause_chain.is_empty(), "no candidate should have been attempted without a credential");
}
