//! OpenRouter adapter: OpenAI-compatible wire format behind OpenRouter's
//! aggregation endpoint, with the two extra attribution headers it asks
//! aggregators to send.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashSet;
use std::sync::Arc;

use crate::adapter::openai_style::{
    from_wire_response, sse_to_chunks, to_wire_request, OpenAiErrorEnvelope, OpenAiResponse,
};
use crate::adapter::{AdapterRunner, ProviderAdapter};
use crate::credentials::CredentialStore;
use crate::envelope::{Capability, GenerationRequest, GenerationResponse, StreamChunk};
use crate::error::{ErrorKind, RouterError};

const PROVIDER_TAG: &str = "openrouter";

pub struct OpenRouterAdapter {
    id: String,
    base_url: String,
    runner: Arc<AdapterRunner>,
    credentials: Arc<CredentialStore>,
}

impl OpenRouterAdapter {
    pub fn new(
        id: impl Into<String>,
        runner: Arc<AdapterRunner>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            runner,
            credentials,
        }
    }

    fn auth_header(&self) -> Result<String, RouterError> {
        let cred = self
            .credentials
            .get(PROVIDER_TAG)
            .ok_or_else(|| RouterError::new(ErrorKind::Auth, "no credential configured"))?;
        Ok(format!("Bearer {}", cred.secret))
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn circuit_state(&self) -> crate::registry::CircuitState {
        self.runner.breaker.current_state(&self.id)
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::Chat, Capability::Completion, Capability::Streaming])
    }

    fn validate(&self, req: &GenerationRequest) -> Result<(), RouterError> {
        req.validate()
    }

    async fn complete(&self, req: &GenerationRequest) -> Result<GenerationResponse, RouterError> {
        self.validate(req)?;
        let model = req
            .model_hint
            .clone()
            .ok_or_else(|| RouterError::invalid_request("model_hint is required"))?;
        let auth = self.auth_header()?;
        let url = format!("{}/chat/completions", self.base_url);
        let wire_req = to_wire_request(&model, req, false);

        let (body, latency_ms) = self
            .runner
            .guarded_call(&self.id, req.max_tokens, req.remaining(), |_attempt| {
                let http = self.runner.http.clone();
                let url = url.clone();
                let auth = auth.clone();
                let wire_req = &wire_req;
                async move {
                    let resp = http
                        .post(&url)
                        .header("Authorization", auth)
                        .header("HTTP-Referer", "https://github.com/llm-router")
                        .header("X-Title", "llm-router")
                        .json(wire_req)
                        .send()
                        .await
                        .map_err(|e| (RouterError::new(ErrorKind::Upstream5xx, e.to_string()), None))?;
                    let status = resp.status().as_u16();
                    if !(200..300).contains(&status) {
                        let text = resp.text().await.unwrap_or_default();
                        let message = serde_json::from_str::<OpenAiErrorEnvelope>(&text)
                            .map(|e| e.error.message)
                            .unwrap_or(text);
                        return Err((RouterError::new(ErrorKind::from_http_status(status), message), None));
                    }
                    resp.json::<OpenAiResponse>()
                        .await
                        .map_err(|e| (RouterError::new(ErrorKind::Internal, e.to_string()), None))
                }
            })
            .await?;

        from_wire_response(&model, PROVIDER_TAG, body, latency_ms)
    }

    async fn stream(
        &self,
        req: &GenerationRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, RouterError>>, RouterError> {
        self.validate(req)?;
        let model = req
            .model_hint
            .clone()
            .ok_or_else(|| RouterError::invalid_request("model_hint is required"))?;
        let auth = self.auth_header()?;
        let url = format!("{}/chat/completions", self.base_url);
        let wire_req = to_wire_request(&model, req, true);

        self.runner.breaker.guard(&self.id).await?;
        self.runner.limiter.acquire(req.max_tokens, req.remaining()).await?;

        let resp = self
            .runner
            .http
            .post(&url)
            .header("Authorization", auth)
            .header("HTTP-Referer", "https://github.com/llm-router")
            .header("X-Title", "llm-router")
            .json(&wire_req)
            .send()
            .await
            .map_err(|e| RouterError::new(ErrorKind::Upstream5xx, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            self.runner.breaker.on_failure(&self.id).await;
            return Err(RouterError::new(ErrorKind::from_http_status(status), "stream request rejected"));
        }
        self.runner.breaker.on_success(&self.id).await;

        Ok(self.runner.watch_stream(&self.id, sse_to_chunks(resp.bytes_stream())))
    }
}
