//! Axum HTTP gateway, per `spec.md` §6.
//!
//! Routes, CORS, and tracing layers mirror the teacher's own server setup
//! (`axum` + `tower-http`); the bearer-token allow-list is new here since
//! the teacher's server authenticates via JWT rather than a static list.

mod openai_compat;

use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::envelope::GenerationRequest;
use crate::error::{ErrorKind, RouterError};
use crate::registry::CircuitState;
use crate::router::Router;

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "error": {
                "kind": self.kind.to_string(),
                "message": self.message,
                "provider": self.provider,
                "model": self.model,
                "attempt_count": self.attempt_count,
                "cause_chain": self.cause_chain,
            }
        }));
        (status, body).into_response()
    }
}

#[derive(Default)]
struct GatewayMetrics {
    requests_total: AtomicU64,
    failures_total: AtomicU64,
    bytes_total: AtomicU64,
}

pub struct GatewayState {
    pub router: Arc<Router>,
    pub allowed_keys: Vec<String>,
    pub started_at: Instant,
    pub audit: crate::audit::AuditSink,
    metrics: GatewayMetrics,
}

impl GatewayState {
    pub fn new(router: Arc<Router>, allowed_keys: Vec<String>, audit: crate::audit::AuditSink) -> Arc<Self> {
        Arc::new(Self {
            router,
            allowed_keys,
            started_at: Instant::now(),
            audit,
            metrics: GatewayMetrics::default(),
        })
    }
}

pub fn build_router(state: Arc<GatewayState>) -> AxumRouter {
    AxumRouter::new()
        .route("/v1/generate", post(generate_handler))
        .route("/v1/chat/completions", post(openai_compat::chat_completions_handler))
        .route("/v1/models", get(models_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn auth_middleware<B>(
    State(state): State<Arc<GatewayState>>,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response, RouterError> {
    // /healthz and /metrics are operational endpoints, not data-plane
    // traffic, and stay unauthenticated so external probes can reach them.
    if req.uri().path() == "/healthz" || req.uri().path() == "/metrics" {
        return Ok(next.run(req).await);
    }

    let key = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match key {
        Some(k) if state.allowed_keys.iter().any(|allowed| allowed == k) => Ok(next.run(req).await),
        _ => Err(RouterError::new(ErrorKind::Auth, "missing or invalid bearer token")),
    }
}

async fn generate_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<GenerationRequest>,
) -> Result<Response, RouterError> {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    let request_id = req.id.to_string();

    if req.stream {
        let stream = state.router.stream(req).await.map_err(|e| {
            state.metrics.failures_total.fetch_add(1, Ordering::Relaxed);
            state.audit.record(audit_record(&request_id, None, None, false, 0.0, 0, "error"));
            e
        })?;
        state.audit.record(audit_record(&request_id, None, None, false, 0.0, 0, "stream_started"));
        let sse_stream = stream.map(|item| match item {
            Ok(chunk) => Ok::<_, std::convert::Infallible>(
                axum::response::sse::Event::default().data(serde_json::to_string(&chunk).unwrap_or_default()),
            ),
            Err(_) => Ok(axum::response::sse::Event::default().data("[DONE]")),
        });
        return Ok(Sse::new(sse_stream).into_response());
    }

    let resp = match state.router.generate(req).await {
        Ok(resp) => resp,
        Err(e) => {
            state.metrics.failures_total.fetch_add(1, Ordering::Relaxed);
            state.audit.record(audit_record(&request_id, None, None, false, 0.0, 0, "error"));
            return Err(e);
        }
    };
    let bytes = serde_json::to_vec(&resp).unwrap_or_default();
    state.metrics.bytes_total.fetch_add(bytes.len() as u64, Ordering::Relaxed);
    state.audit.record(audit_record(
        &request_id,
        Some(resp.model_id.clone()),
        Some(resp.provider.clone()),
        resp.cached,
        resp.cost_usd,
        resp.latency_ms,
        "ok",
    ));
    Ok(Json(resp).into_response())
}

fn audit_record(
    request_id: &str,
    model_id: Option<String>,
    provider: Option<String>,
    cached: bool,
    cost_usd: f64,
    latency_ms: u64,
    outcome: &'static str,
) -> crate::audit::AuditRecord {
    crate::audit::AuditRecord {
        request_id: request_id.to_string(),
        model_id,
        provider,
        cached,
        cost_usd,
        latency_ms,
        outcome,
        created_at: chrono::Utc::now(),
    }
}

async fn models_handler(State(state): State<Arc<GatewayState>>) -> Json<Vec<crate::registry::ModelDescriptor>> {
    Json(state.router.list_models())
}

async fn healthz_handler(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    let models = state.router.list_models();
    let mut degraded = false;
    let mut down = true;
    let mut entries = Vec::new();
    for m in &models {
        let health = state.router.health_of(&m.id);
        if health.circuit_state != CircuitState::Open {
            down = false;
        }
        if health.circuit_state == CircuitState::HalfOpen {
            degraded = true;
        }
        entries.push(serde_json::json!({
            "id": m.id,
            "circuit_state": health.circuit_state,
            "avg_latency_ms": health.avg_latency_ms,
        }));
    }
    let status = if models.is_empty() {
        "down"
    } else if down {
        "down"
    } else if degraded {
        "degraded"
    } else {
        "ok"
    };
    Json(serde_json::json!({ "status": status, "models": entries }))
}

async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> String {
    format!(
        "# HELP llm_router_requests_total Total inbound requests\n\
         # TYPE llm_router_requests_total counter\n\
         llm_router_requests_total {}\n\
         # HELP llm_router_failures_total Total failed requests\n\
         # TYPE llm_router_failures_total counter\n\
         llm_router_failures_total {}\n\
         # HELP llm_router_response_bytes_total Total response bytes served\n\
         # TYPE llm_router_response_bytes_total counter\n\
         llm_router_response_bytes_total {}\n\
         # HELP llm_router_cost_usd_total Total accounted spend in USD\n\
         # TYPE llm_router_cost_usd_total counter\n\
         llm_router_cost_usd_total {}\n",
        state.metrics.requests_total.load(Ordering::Relaxed),
        state.metrics.failures_total.load(Ordering::Relaxed),
        state.metrics.bytes_total.load(Ordering::Relaxed),
        state.router.total_cost_usd(),
    )
}
