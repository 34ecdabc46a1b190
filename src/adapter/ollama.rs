//! Ollama-style local backend adapter: NDJSON framing, no credential
//! required, `/api/chat` endpoint.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::adapter::sse::NdjsonParser;
use crate::adapter::{AdapterRunner, ProviderAdapter};
use crate::envelope::{
    Capability, ChatMessage, FinishReason, GenerationRequest, GenerationResponse, Input, Role,
    StreamChunk, Usage,
};
use crate::error::{ErrorKind, RouterError};

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Deserialize, Default)]
struct OllamaMessageBody {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    message: OllamaMessageBody,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

fn wire_message(m: &ChatMessage) -> OllamaMessage {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "user",
    };
    OllamaMessage { role, content: m.content.clone() }
}

fn to_wire_request(model: &str, req: &GenerationRequest, stream: bool) -> OllamaRequest {
    let messages = match &req.input {
        Input::Prompt(p) => vec![OllamaMessage { role: "user", content: p.clone() }],
        Input::Messages(msgs) => msgs.iter().map(wire_message).collect(),
    };
    OllamaRequest {
        model: model.to_string(),
        messages,
        stream,
        options: OllamaOptions {
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            num_predict: req.max_tokens,
        },
    }
}

pub struct OllamaAdapter {
    id: String,
    base_url: String,
    runner: Arc<AdapterRunner>,
}

impl OllamaAdapter {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, runner: Arc<AdapterRunner>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            runner,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
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
        let url = format!("{}/api/chat", self.base_url);
        let wire_req = to_wire_request(&model, req, false);

        let (body, latency_ms) = self
            .runner
            .guarded_call(&self.id, req.max_tokens, req.remaining(), |_attempt| {
                let http = self.runner.http.clone();
                let url = url.clone();
                let wire_req = &wire_req;
                async move {
                    let resp = http
                        .post(&url)
                        .json(wire_req)
                        .send()
                        .await
                        .map_err(|e| (RouterError::new(ErrorKind::Upstream5xx, e.to_string()), None))?;
                    let status = resp.status().as_u16();
                    if !(200..300).contains(&status) {
                        let text = resp.text().await.unwrap_or_default();
                        return Err((RouterError::new(ErrorKind::from_http_status(status), text), None));
                    }
                    resp.json::<OllamaResponse>()
                        .await
                        .map_err(|e| (RouterError::new(ErrorKind::Internal, e.to_string()), None))
                }
            })
            .await?;

        Ok(GenerationResponse {
            text: body.message.content,
            model_id: model,
            provider: "ollama".to_string(),
            usage: Usage::new(body.prompt_eval_count, body.eval_count),
            cost_usd: 0.0,
            finish_reason: if body.done { FinishReason::Stop } else { FinishReason::Length },
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
        let url = format!("{}/api/chat", self.base_url);
        let wire_req = to_wire_request(&model, req, true);

        self.runner.breaker.guard(&self.id).await?;
        self.runner.limiter.acquire(req.max_tokens, req.remaining()).await?;

        let resp = self
            .runner
            .http
            .post(&url)
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

        let mut parser = NdjsonParser::new();

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
                for value in parser.push(&chunk) {
                    match serde_json::from_value::<OllamaResponse>(value) {
                        Ok(parsed) => {
                            if !parsed.message.content.is_empty() {
                                out.push(Ok(StreamChunk::text(parsed.message.content)));
                            }
                            if parsed.done {
                                out.push(Ok(StreamChunk::terminal(
                                    FinishReason::Stop,
                                    Usage::new(parsed.prompt_eval_count, parsed.eval_count),
                                )));
                            }
                        }
                        Err(_) => tracing::warn!("skipping malformed NDJSON payload"),
                    }
                }
                out
            })
            .flat_map(stream::iter)
            .boxed();

        Ok(self.runner.watch_stream(&self.id, chunks))
    }
}
