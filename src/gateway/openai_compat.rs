//! `POST /v1/chat/completions` — OpenAI-compatible ingress/egress, so
//! existing OpenAI SDKs can point at this gateway unchanged. Translation is
//! intentionally one way per call: canonical envelope in, canonical
//! envelope out, OpenAI shape only at the HTTP edge.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::envelope::{ChatMessage, FinishReason, GenerationRequest, GenerationResponse, Role};
use crate::error::RouterError;

use super::GatewayState;

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

fn wire_role_to_role(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

fn role_to_wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn to_canonical(req: ChatCompletionRequest) -> GenerationRequest {
    let messages = req
        .messages
        .into_iter()
        .map(|m| ChatMessage { role: wire_role_to_role(&m.role), content: m.content })
        .collect();
    let mut canonical = GenerationRequest::new_chat(messages, req.max_tokens.unwrap_or(1024));
    canonical.model_hint = Some(req.model);
    canonical.temperature = req.temperature.unwrap_or(1.0);
    canonical.top_p = req.top_p.unwrap_or(1.0);
    canonical.stream = req.stream;
    if let Some(stop) = req.stop {
        canonical.stop = stop.into_iter().collect();
    }
    canonical
}

#[derive(Debug, Serialize)]
struct ChatCompletionChoice {
    index: u32,
    message: WireMessage,
    finish_reason: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<ChatCompletionChoice>,
    usage: ChatCompletionUsage,
}

fn finish_reason_to_wire(fr: FinishReason) -> &'static str {
    match fr {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ContentFilter => "content_filter",
        FinishReason::ToolCall => "tool_calls",
        FinishReason::Error | FinishReason::Cancelled => "stop",
    }
}

fn from_canonical(resp: GenerationResponse) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: "chat.completion",
        created: resp.created_at.timestamp(),
        model: resp.model_id,
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: WireMessage { role: role_to_wire_role(Role::Assistant).to_string(), content: resp.text },
            finish_reason: finish_reason_to_wire(resp.finish_reason).to_string(),
        }],
        usage: ChatCompletionUsage {
            prompt_tokens: resp.usage.prompt_tokens,
            completion_tokens: resp.usage.completion_tokens,
            total_tokens: resp.usage.total_tokens,
        },
    }
}

pub async fn chat_completions_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, RouterError> {
    let canonical = to_canonical(req);
    let resp = state.router.generate(canonical).await?;
    Ok(Json(from_canonical(resp)).into_response())
}
