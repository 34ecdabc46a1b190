//! # llm-router
//!
//! An orchestration kernel for a unified LLM inference router: a single
//! request-level gateway that accepts a generation request, selects a
//! backend model, dispatches it through a provider-specific adapter, and
//! normalizes the result into one cross-provider envelope — unary or
//! streamed.
//!
//! ## Core components
//!
//! - [`envelope`] — canonical request/response/stream-chunk types every
//!   adapter and the gateway speak.
//! - [`error`] — the closed [`error::ErrorKind`] taxonomy and
//!   [`error::RouterError`] threaded through every layer.
//! - [`credentials`] — provider credential store with masked rendering.
//! - [`ratelimit`] — per-backend token-bucket rate limiting.
//! - [`retry`] — exponential backoff with jitter and retryable
//!   classification.
//! - [`breaker`] — per-backend three-state circuit breaker.
//! - [`cache`] — fingerprint-keyed, single-flight response cache.
//! - [`adapter`] — the [`adapter::ProviderAdapter`] contract plus six
//!   concrete backends.
//! - [`registry`] — the model registry and rolling health state.
//! - [`strategy`] — pure candidate-ranking functions.
//! - [`router`] — [`router::Router`], tying selection, fallback, cache, and
//!   cost accounting together.
//! - [`cost`] — the per-process cost ledger.
//! - [`config`] — the closed [`config::RouterSettings`] struct.
//! - [`gateway`] — the Axum HTTP surface.
//!
//! Everything above this line is the orchestration kernel; the CLI in
//! `bin/llm-router.rs` is a thin shell around it.

pub mod adapter;
pub mod audit;
pub mod breaker;
pub mod cache;
pub mod cli;
pub mod config;
pub mod cost;
pub mod credentials;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod ratelimit;
pub mod registry;
pub mod retry;
pub mod router;
pub mod strategy;

pub use envelope::{
    Capability, ChatMessage, FinishReason, GenerationRequest, GenerationResponse, Input, Role,
    StreamChunk, Usage,
};
pub use error::{ErrorKind, RouterError, RouterResult};
pub use router::Router;
pub use strategy::Strategy;
