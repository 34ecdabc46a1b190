//! Canonical, provider-neutral request/response/stream-chunk types.
//!
//! These are value types: constructing one never touches I/O, and nothing
//! here hides mutability behind an `Arc` or a lock. See `spec.md` §3.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

use crate::error::RouterError;

/// Role of a chat message, per `spec.md` §3's `{system,user,assistant,tool}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Either a flat prompt or an ordered chat transcript — never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    Prompt(String),
    Messages(Vec<ChatMessage>),
}

/// Canonical request a caller submits to the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default = "uuid::Uuid::new_v4")]
    pub id: uuid::Uuid,
    pub input: Input,
    #[serde(default)]
    pub model_hint: Option<String>,
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub stop: HashSet<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
    #[serde(default)]
    pub user_tag: Option<String>,
    #[serde(skip, default)]
    pub deadline: Option<SystemTime>,
    #[serde(default)]
    pub cost_ceiling: Option<f64>,
}

fn default_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    1.0
}

impl GenerationRequest {
    pub fn new_prompt(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            input: Input::Prompt(prompt.into()),
            model_hint: None,
            max_tokens,
            temperature: 1.0,
            top_p: 1.0,
            top_k: None,
            stop: HashSet::new(),
            stream: false,
            seed: None,
            tools: None,
            user_tag: None,
            deadline: None,
            cost_ceiling: None,
        }
    }

    pub fn new_chat(messages: Vec<ChatMessage>, max_tokens: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            input: Input::Messages(messages),
            model_hint: None,
            max_tokens,
            temperature: 1.0,
            top_p: 1.0,
            top_k: None,
            stop: HashSet::new(),
            stream: false,
            seed: None,
            tools: None,
            user_tag: None,
            deadline: None,
            cost_ceiling: None,
        }
    }

    pub fn with_deadline(mut self, d: Duration) -> Self {
        self.deadline = Some(SystemTime::now() + d);
        self
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
    }

    /// Total character count across the prompt or every message, used to
    /// bound a pre-dispatch token estimate. Not a token count itself.
    pub fn prompt_char_len(&self) -> usize {
        match &self.input {
            Input::Prompt(p) => p.chars().count(),
            Input::Messages(m) => m.iter().map(|msg| msg.content.chars().count()).sum(),
        }
    }

    /// `spec.md` §3 invariants: exactly one of prompt/messages, non-empty,
    /// temperature non-negative, prompt length bounded.
    pub fn validate(&self) -> Result<(), RouterError> {
        match &self.input {
            Input::Prompt(p) => {
                if p.is_empty() {
                    return Err(RouterError::invalid_request("prompt must not be empty"));
                }
                if p.chars().count() > 100_000 {
                    return Err(RouterError::invalid_request(
                        "prompt exceeds 100,000 characters",
                    ));
                }
            }
            Input::Messages(m) => {
                if m.is_empty() {
                    return Err(RouterError::invalid_request("messages must not be empty"));
                }
            }
        }
        if self.temperature < 0.0 {
            return Err(RouterError::invalid_request("temperature must be >= 0"));
        }
        if self.max_tokens < 1 {
            return Err(RouterError::invalid_request("max_tokens must be >= 1"));
        }
        Ok(())
    }

    /// Whether `tools` disqualifies this request from the response cache
    /// (Open Question resolved in `spec.md` §9: tool-bearing requests are
    /// never cached, and streaming requests never are either).
    pub fn is_cacheable(&self) -> bool {
        !self.stream && self.tools.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCall,
    Error,
    Cancelled,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::ToolCall => "tool_call",
            FinishReason::Error => "error",
            FinishReason::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FinishReason {
    /// Maps each adapter's native finish-reason string into the canonical
    /// set, per `spec.md` §4.8.
    pub fn from_provider_str(s: &str) -> Self {
        match s {
            "stop" | "end_turn" | "STOP" => FinishReason::Stop,
            "length" | "max_tokens" | "MAX_TOKENS" => FinishReason::Length,
            "content_filter" | "SAFETY" => FinishReason::ContentFilter,
            "tool_use" | "tool_calls" | "function_call" => FinishReason::ToolCall,
            _ => FinishReason::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Normalized reply returned to the caller, per `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub model_id: String,
    pub provider: String,
    pub usage: Usage,
    pub cost_usd: f64,
    pub finish_reason: FinishReason,
    pub latency_ms: u64,
    pub cached: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Element of the lazy streamed sequence, per `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub delta_text: String,
    pub delta_tokens: Option<u32>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta_text: delta.into(),
            delta_tokens: None,
            finish_reason: None,
            usage: None,
            raw: None,
        }
    }

    pub fn terminal(finish_reason: FinishReason, usage: Usage) -> Self {
        Self {
            delta_text: String::new(),
            delta_tokens: None,
            finish_reason: Some(finish_reason),
            usage: Some(usage),
            raw: None,
        }
    }
}

/// Capability surface a model can advertise, per `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Completion,
    Streaming,
    Tools,
    Vision,
    Embeddings,
    JsonMode,
}
