//! OpenAI-compatible chat-completions adapter.
//!
//! Wire format and SSE framing mirror the teacher's
//! `llm::providers::openai::client::OpenAIClient` (`chat/completions`
//! endpoint, `data: {json}` / `data: [DONE]` streaming). The request/response
//! conversion helpers here are reused as-is by the Groq and OpenRouter
//! adapters, since both speak the same wire format behind a different base
//! URL and header set.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::adapter::sse::{SseParser, SSE_DONE_SENTINEL};
use crate::adapter::{AdapterRunner, ProviderAdapter};
use crate::credentials::CredentialStore;
use crate::envelope::{
    Capability, ChatMessage, FinishReason, GenerationRequest, GenerationResponse, Input, Role,
    StreamChunk, Usage,
};
use crate::error::{ErrorKind, RouterError};

#[derive(Debug, Serialize)]
pub(crate) struct OpenAiChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<OpenAiChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiChoiceMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiChoice {
    pub message: Option<OpenAiChoiceMessage>,
    pub delta: Option<OpenAiDelta>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiDelta {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiResponse {
    pub choices: Vec<OpenAiChoice>,
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiErrorEnvelope {
    pub error: OpenAiErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiErrorBody {
    pub message: String,
}

pub(crate) fn to_wire_messages(req: &GenerationRequest) -> Vec<OpenAiChatMessage> {
    match &req.input {
        Input::Prompt(p) => vec![OpenAiChatMessage {
            role: "user",
            content: p.clone(),
        }],
        Input::Messages(msgs) => msgs.iter().map(wire_message).collect(),
    }
}

fn wire_message(m: &ChatMessage) -> OpenAiChatMessage {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    OpenAiChatMessage {
        role,
        content: m.content.clone(),
    }
}

pub(crate) fn to_wire_request(model: &str, req: &GenerationRequest, stream: bool) -> OpenAiRequest {
    OpenAiRequest {
        model: model.to_string(),
        messages: to_wire_messages(req),
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop.iter().cloned().collect(),
        stream,
    }
}

pub(crate) fn from_wire_response(
    model_id: &str,
    provider: &str,
    body: OpenAiResponse,
    latency_ms: u64,
) -> Result<GenerationResponse, RouterError> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| RouterError::new(ErrorKind::Internal, "provider returned no choices"))?;
    let text = choice
        .message
        .and_then(|m| m.content)
        .unwrap_or_default();
    let finish_reason = choice
        .finish_reason
        .as_deref()
        .map(FinishReason::from_provider_str)
        .unwrap_or(FinishReason::Stop);
    let usage = body
        .usage
        .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    Ok(GenerationResponse {
        text,
        model_id: model_id.to_string(),
        provider: provider.to_string(),
        usage,
        cost_usd: 0.0,
        finish_reason,
        latency_ms,
        cached: false,
        metadata: Default::default(),
        created_at: chrono::Utc::now(),
    })
}

/// Drives an `SseParser` over a byte stream, yielding canonical
/// [`StreamChunk`]s. Shared by every adapter speaking OpenAI-style SSE.
pub(crate) fn sse_to_chunks(
    byte_stream: impl futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> BoxStream<'static, Result<StreamChunk, RouterError>> {
    let mut parser = SseParser::new();
    let mut usage_acc = Usage::default();

    byte_stream
        .map(move |chunk_result| -> Vec<Result<StreamChunk, RouterError>> {
            let chunk = match chunk_result {
                Ok(b) => b,
                Err(e) => {
                    return vec![Err(RouterError::new(
                        ErrorKind::Upstream5xx,
                        format!("stream read error: {e}"),
                    ))]
                }
            };
            let mut out = Vec::new();
            for event in parser.push(&chunk) {
                if event.data == SSE_DONE_SENTINEL {
                    out.push(Ok(StreamChunk::terminal(FinishReason::Stop, usage_acc)));
                    continue;
                }
                match serde_json::from_str::<OpenAiResponse>(&event.data) {
                    Ok(parsed) => {
                        if let Some(u) = parsed.usage {
                            usage_acc = Usage::new(u.prompt_tokens, u.completion_tokens);
                        }
                        if let Some(choice) = parsed.choices.into_iter().next() {
                            if let Some(delta) = choice.delta.and_then(|d| d.content) {
                                if !delta.is_empty() {
                                    out.push(Ok(StreamChunk::text(delta)));
                                }
                            }
                            if let Some(fr) = choice.finish_reason {
                                out.push(Ok(StreamChunk::terminal(
                                    FinishReason::from_provider_str(&fr),
                                    usage_acc,
                                )));
                            }
                        }
                    }
                    Err(_) => {
                        tracing::warn!("skipping malformed streaming payload");
                    }
                }
            }
            out
        })
        .flat_map(stream::iter)
        .boxed()
}

/// Concrete adapter for any OpenAI-compatible `chat/completions` backend.
pub struct OpenAiStyleAdapter {
    id: String,
    base_url: String,
    provider_tag: String,
    runner: Arc<AdapterRunner>,
    credentials: Arc<CredentialStore>,
}

impl OpenAiStyleAdapter {
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
            runner,
            credentials,
        }
    }

    fn auth_header(&self) -> Result<String, RouterError> {
        let cred = self
            .credentials
            .get(&self.provider_tag)
            .ok_or_else(|| RouterError::new(ErrorKind::Auth, "no credential configured"))?;
        Ok(format!("Bearer {}", cred.secret))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiStyleAdapter {
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
                        .json(wire_req)
                        .send()
                        .await
                        .map_err(|e| (RouterError::new(ErrorKind::Upstream5xx, e.to_string()), None))?;
                    let status = resp.status().as_u16();
                    if !(200..300).contains(&status) {
                        let retry_after = None;
                        let text = resp.text().await.unwrap_or_default();
                        let message = serde_json::from_str::<OpenAiErrorEnvelope>(&text)
                            .map(|e| e.error.message)
                            .unwrap_or(text);
                        return Err((
                            RouterError::new(ErrorKind::from_http_status(status), message),
                            retry_after,
                        ));
                    }
                    resp.json::<OpenAiResponse>()
                        .await
                        .map_err(|e| (RouterError::new(ErrorKind::Internal, e.to_string()), None))
                }
            })
            .await?;

        from_wire_response(&model, &self.provider_tag, body, latency_ms)
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
            .json(&wire_req)
            .send()
            .await
            .map_err(|e| RouterError::new(ErrorKind::Upstream5xx, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            self.runner.breaker.on_failure(&self.id).await;
            return Err(RouterError::new(
                ErrorKind::from_http_status(status),
                "stream request rejected",
            ));
        }
        self.runner.breaker.on_success(&self.id).await;

        Ok(self.runner.watch_stream(&self.id, sse_to_chunks(resp.bytes_stream())))
    }
}
