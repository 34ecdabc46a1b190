//! Anthropic-compatible Messages API adapter.
//!
//! Wire shape (separate `system` field, named SSE events rather than a
//! single `data:`-only framing) is grounded in the teacher's
//! `llm::providers` module list, which already distinguishes an Anthropic
//! provider type from the OpenAI-compatible ones; the concrete request/
//! response mapping is new here since the teacher's Anthropic client body
//! was not part of the retrieved slice.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::adapter::sse::SseParser;
use crate::adapter::{AdapterRunner, ProviderAdapter};
use crate::credentials::CredentialStore;
use crate::envelope::{
    Capability, FinishReason, GenerationRequest, GenerationResponse, Input, Role, StreamChunk,
    Usage,
};
use crate::error::{ErrorKind, RouterError};

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorEnvelope {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Incremental event payloads relevant to streaming; Anthropic splits the
/// transcript across `message_start`, `content_block_delta`, and
/// `message_delta` events rather than repeating the full message each time.
#[derive(Debug, Deserialize)]
struct AnthropicStreamEvent {
    #[serde(default)]
    delta: Option<AnthropicStreamDelta>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamDelta {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

fn to_wire_request(model: &str, req: &GenerationRequest, stream: bool) -> AnthropicRequest {
    let (system, messages) = match &req.input {
        Input::Prompt(p) => (None, vec![AnthropicMessage { role: "user", content: p.clone() }]),
        Input::Messages(msgs) => {
            let mut system = None;
            let mut out = Vec::new();
            for m in msgs {
                match m.role {
                    Role::System => system = Some(m.content.clone()),
                    Role::User => out.push(AnthropicMessage { role: "user", content: m.content.clone() }),
                    Role::Assistant => out.push(AnthropicMessage { role: "assistant", content: m.content.clone() }),
                    Role::Tool => out.push(AnthropicMessage { role: "user", content: m.content.clone() }),
                }
            }
            (system, out)
        }
    };
    AnthropicRequest {
        model: model.to_string(),
        system,
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop_sequences: req.stop.iter().cloned().collect(),
        stream,
    }
}

pub struct AnthropicStyleAdapter {
    id: String,
    base_url: String,
    provider_tag: String,
    api_version: String,
    runner: Arc<AdapterRunner>,
    credentials: Arc<CredentialStore>,
}

impl AnthropicStyleAdapter {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        provider_tag: impl Into<String>,
        runner: Arc<AdapterRunner>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            provider_tag: provider_tag.into(),
            api_version: "2023-06-01".to_string(),
            runner,
            credentials,
        }
    }

    fn api_key(&self) -> Result<String, RouterError> {
        self.credentials
            .get(&self.provider_tag)
            .map(|c| c.secret)
            .ok_or_else(|| RouterError::new(ErrorKind::Auth, "no credential configured"))
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicStyleAdapter {
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
        let api_key = self.api_key()?;
        let url = format!("{}/messages", self.base_url);
        let wire_req = to_wire_request(&model, req, false);

        let (body, latency_ms) = self
            .runner
            .guarded_call(&self.id, req.max_tokens, req.remaining(), |_attempt| {
                let http = self.runner.http.clone();
                let url = url.clone();
                let api_key = api_key.clone();
                let api_version = self.api_version.clone();
                let wire_req = &wire_req;
                async move {
                    let resp = http
                        .post(&url)
                        .header("x-api-key", api_key)
                        .header("anthropic-version", api_version)
                        .json(wire_req)
                        .send()
                        .await
                        .map_err(|e| (RouterError::new(ErrorKind::Upstream5xx, e.to_string()), None))?;
                    let status = resp.status().as_u16();
                    if !(200..300).contains(&status) {
                        let text = resp.text().await.unwrap_or_default();
                        let message = serde_json::from_str::<AnthropicErrorEnvelope>(&text)
                            .map(|e| e.error.message)
                            .unwrap_or(text);
                        return Err((RouterError::new(ErrorKind::from_http_status(status), message), None));
                    }
                    resp.json::<AnthropicResponse>()
                        .await
                        .map_err(|e| (RouterError::new(ErrorKind::Internal, e.to_string()), None))
                }
            })
            .await?;

        let text = body.content.into_iter().map(|b| b.text).collect::<Vec<_>>().join("");
        let finish_reason = body
            .stop_reason
            .as_deref()
            .map(FinishReason::from_provider_str)
            .unwrap_or(FinishReason::Stop);

        Ok(GenerationResponse {
            text,
            model_id: model,
            provider: self.provider_tag.clone(),
            usage: Usage::new(body.usage.input_tokens, body.usage.output_tokens),
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
        let api_key = self.api_key()?;
        let url = format!("{}/messages", self.base_url);
        let wire_req = to_wire_request(&model, req, true);

        self.runner.breaker.guard(&self.id).await?;
        self.runner.limiter.acquire(req.max_tokens, req.remaining()).await?;

        let resp = self
            .runner
            .http
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", self.api_version.clone())
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

        let mut parser = SseParser::new();
        let mut usage_acc = Usage::default();

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
                    match serde_json::from_str::<AnthropicStreamEvent>(&event.data) {
                        Ok(parsed) => {
                            if let Some(u) = parsed.usage {
                                usage_acc = Usage::new(u.input_tokens, u.output_tokens);
                            }
                            if let Some(delta) = parsed.delta {
                                if let Some(text) = delta.text {
                                    if !text.is_empty() {
                                        out.push(Ok(StreamChunk::text(text)));
                                    }
                                }
                                if let Some(stop_reason) = delta.stop_reason {
                                    out.push(Ok(StreamChunk::terminal(
                                        FinishReason::from_provider_str(&stop_reason),
                                        usage_acc,
                                    )));
                                }
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
