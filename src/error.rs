//! Error taxonomy shared by every component in the kernel.
//!
//! Every failure belongs to exactly one [`ErrorKind`]. Adapters and the
//! router never construct bare strings; they build a [`RouterError`] so
//! retryability and HTTP status can be derived mechanically at the edges
//! (the retry engine, the fallback chain, the gateway).

use serde::{Deserialize, Serialize};
use std::fmt;

/// One entry in a failed candidate's `cause_chain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub model_id: String,
    pub provider: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// The closed taxonomy from the spec. Each variant carries its own
/// retryability and HTTP status, computed in `is_retryable`/`http_status`
/// rather than duplicated at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    Auth,
    Forbidden,
    NotFound,
    RateLimit,
    Timeout,
    Upstream5xx,
    CircuitOpen,
    ContentFilter,
    CostCeiling,
    Overloaded,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Per `spec.md` §7. Retries happen *inside* the adapter; the router
    /// only consults this to decide whether to fail over to the next
    /// candidate once an adapter call has terminally failed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Timeout | ErrorKind::Upstream5xx
        )
    }

    /// Errors the router fails over on once the adapter has given up.
    pub fn triggers_failover(self) -> bool {
        matches!(
            self,
            ErrorKind::CircuitOpen
                | ErrorKind::Upstream5xx
                | ErrorKind::Timeout
                | ErrorKind::Overloaded
        )
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Auth => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::RateLimit => 429,
            ErrorKind::Timeout => 504,
            ErrorKind::Upstream5xx => 502,
            ErrorKind::CircuitOpen => 503,
            ErrorKind::ContentFilter => 422,
            ErrorKind::CostCeiling => 402,
            ErrorKind::Overloaded => 503,
            ErrorKind::Cancelled => 499,
            ErrorKind::Internal => 500,
        }
    }

    /// Classify an HTTP status code the way an adapter base would, per
    /// `spec.md` §4.3's retryable-classification table.
    pub fn from_http_status(status: u16) -> ErrorKind {
        match status {
            400 => ErrorKind::InvalidRequest,
            401 => ErrorKind::Auth,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            408 | 425 | 429 => ErrorKind::RateLimit,
            422 => ErrorKind::ContentFilter,
            500 | 502 | 503 | 504 => ErrorKind::Upstream5xx,
            _ => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Auth => "auth",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Upstream5xx => "upstream_5xx",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::ContentFilter => "content_filter",
            ErrorKind::CostCeiling => "cost_ceiling",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// The error type threaded through adapters, the router, and the gateway.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RouterError {
    pub kind: ErrorKind,
    pub message: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub attempt_count: u32,
    pub cause_chain: Vec<CandidateFailure>,
}

impl RouterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
            model: None,
            attempt_count: 0,
            cause_chain: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempt_count = attempts;
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Attach one more attempted candidate to the exhaustion trail.
    pub fn push_cause(&mut self, failure: CandidateFailure) {
        self.cause_chain.push(failure);
    }

    pub fn no_candidate_succeeded(cause_chain: Vec<CandidateFailure>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: "no candidate backend succeeded".to_string(),
            provider: None,
            model: None,
            attempt_count: cause_chain.len() as u32,
            cause_chain,
        }
    }
}

pub type RouterResult<T> = Result<T, RouterError>;
