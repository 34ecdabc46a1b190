//! Generic SSE adapter: the escape hatch for any backend that speaks
//! plain `data: {json}` SSE with a configurable JSON pointer to the delta
//! text, rather than one of the five named wire formats. Per `spec.md`
//! §9's resolved Open Question, further providers beyond the six canonical
//! adapters are expected to be price-table/error-map rows layered on top
//! of this adapter, not new modules.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::adapter::sse::{SseParser, SSE_DONE_SENTINEL};
use crate::adapter::{AdapterRunner, ProviderAdapter};
use crate::credentials::CredentialStore;
use crate::envelope::{Capability, FinishReason, GenerationRequest, GenerationResponse, Input, StreamChunk, Usage};
use crate::error::{ErrorKind, RouterError};

/// Where in a JSON body the delta text and finish reason live, as
/// dot-separated paths (e.g. `"choices.0.delta.content"`). Lets one
/// adapter serve any SSE backend close enough to the OpenAI shape without
/// a bespoke wire struct.
#[derive(Debug, Clone)]
pub struct GenericSseSchema {
    pub text_path: Vec<String>,
    pub finish_path: Vec<String>,
}

impl Default for GenericSseSchema {
    fn default() -> Self {
        Self {
            text_path: vec!["choices".into(), "0".into(), "delta".into(), "content".into()],
            finish_path: vec!["choices".into(), "0".into(), "finish_reason".into()],
        }
    }
}

fn walk<'a>(value: &'a serde_json::Value, path: &[String]) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path {
        current = if let Ok(idx) = segment.parse::<usize>() {
            current.get(idx)?
        } else {
            current.get(segment)?
        };
    }
    Some(current)
}

#[derive(Debug, Serialize)]
struct GenericRequest {
    model: String,
    prompt: String,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

fn flatten_prompt(req: &GenerationRequest) -> String {
    match &req.input {
        Input::Prompt(p) => p.clone(),
        Input::Messages(msgs) => msgs
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

pub struct GenericSseAdapter {
    id: String,
    base_url: String,
    path: String,
    provider_tag: String,
    schema: GenericSseSchema,
    runner: Arc<AdapterRunner>,
    credentials: Arc<CredentialStore>,
}

impl GenericSseAdapter {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        path: impl Into<String>,
        provider_tag: impl Into<String>,
        schema: GenericSseSchema,
        runner: Arc<AdapterRunner>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            path: path.into(),
            provider_tag: provider_tag.into(),
            schema,
            runner,
            credentials,
        }
    }

    fn auth_header(&self) -> Option<String> {
        self.credentials.get(&self.provider_tag).map(|c| format!("Bearer {}", c.secret))
    }
}

#[async_trait]
impl ProviderAdapter for GenericSseAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn circuit_state(&self) -> crate::registry::CircuitState {
        self.runner.breaker.current_state(&self.id)
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::Completion, Capability::Streaming])
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
        let url = format!("{}{}", self.base_url, self.path);
        let wire_req = GenericRequest {
            model: model.clone(),
            prompt: flatten_prompt(req),
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stream: false,
        };
        let auth = self.auth_header();

        let (body, latency_ms) = self
            .runner
            .guarded_call(&self.id, req.max_tokens, req.remaining(), |_attempt| {
                let http = self.runner.http.clone();
                let url = url.clone();
                let auth = auth.clone();
                let wire_req = &wire_req;
                async move {
                    let mut builder = http.post(&url).json(wire_req);
                    if let Some(auth) = auth {
                        builder = builder.header("Authorization", auth);
                    }
                    let resp = builder
                        .send()
                        .await
                        .map_err(|e| (RouterError::new(ErrorKind::Upstream5xx, e.to_string()), None))?;
                    let status = resp.status().as_u16();
                    let text = resp.text().await.unwrap_or_default();
                    if !(200..300).contains(&status) {
                        return Err((RouterError::new(ErrorKind::from_http_status(status), text), None));
                    }
                    serde_json::from_str::<serde_json::Value>(&text)
                        .map_err(|e| (RouterError::new(ErrorKind::Internal, e.to_string()), None))
                }
            })
            .await?;

        let text = walk(&body, &self.schema.text_path)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let finish_reason = walk(&body, &self.schema.finish_path)
            .and_then(|v| v.as_str())
            .map(FinishReason::from_provider_str)
            .unwrap_or(FinishReason::Stop);

        Ok(GenerationResponse {
            text,
            model_id: model,
            provider: self.provider_tag.clone(),
            usage: Usage::default(),
            cost_usd: 0.0,
            finish_reason,
            latency_ms,
            cached: false,
            metadata: Default::default(),
            created_at: chrono::Utc::now(),
        })
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
        let url = format!("{}{}", self.base_url, self.path);
        let wire_req = GenericRequest {
            model,
            prompt: flatten_prompt(req),
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stream: true,
        };

        self.runner.breaker.guard(&self.id).await?;
        self.runner.limiter.acquire(req.max_tokens, req.remaining()).await?;

        let mut builder = self.runner.http.post(&url).json(&wire_req);
        if let Some(auth) = self.auth_header() {
            builder = builder.header("Authorization", auth);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| RouterError::new(ErrorKind::Upstream5xx, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            self.runner.breaker.on_failure(&self.id).await;
            return Err(RouterError::new(ErrorKind::from_http_status(status), "stream request rejected"));
        }
        self.runner.breaker.on_success(&self.id).await;

        let schema = self.schema.clone();
        let mut parser = SseParser::new();

        let chunks = resp
            .bytes_stream()
            .map(move |chunk_result| -> Vec<Result<StreamChunk, RouterError>> {
                let chunk = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        return vec![Err(RouterError::new(ErrorKind::Upstream5xx, e.to_string()))]
                    }
                };
                let mut out = Vec::new();
                for event in parser.push(&chunk) {
                    if event.data == SSE_DONE_SENTINEL {
                        out.push(Ok(StreamChunk::terminal(FinishReason::Stop, Usage::default())));
                        continue;
                    }
                    match serde_json::from_str::<serde_json::Value>(&event.data) {
                        Ok(value) => {
                            if let Some(text) = walk(&value, &schema.text_path).and_then(|v| v.as_str()) {
                                if !text.is_empty() {
                                    out.push(Ok(StreamChunk::text(text.to_string())));
                                }
                            }
                            if let Some(fr) = walk(&value, &schema.finish_path).and_then(|v| v.as_str()) {
                                out.push(Ok(StreamChunk::terminal(
                                    FinishReason::from_provider_str(fr),
                                    Usage::default(),
                                )));
                            }
                        }
                        Err(_) => tracing::warn!("skipping malformed streaming payload"),
                    }
                }
                out
            })
            .flat_map(stream::iter)
            .boxed();

        Ok(self.runner.watch_stream(&self.id, chunks))
    }
}
