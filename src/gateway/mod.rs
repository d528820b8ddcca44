//! HTTP gateway: `POST /api/optimize`, `GET /health`, `GET /metrics`.
//!
//! `Router<GatewayState>` built from small per-route async functions, a
//! shared `Clone`-able state struct passed through `State<...>`, and a
//! `/health` handler reporting uptime from a process-start `OnceLock`.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::audit::AuditRing;
use crate::error::PipelineError;
use crate::orchestrator::{Orchestrator, OrchestratorRequest};
use crate::planner::OptimizationLevel;
use crate::telemetry::Metrics;
use crate::types::{new_trace_id, OptimizationResponse};

static START_TIME: OnceLock<Instant> = OnceLock::new();

const TRACE_ID_HEADER: &str = "x-trace-id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Arc<Metrics>,
    pub audit: Arc<AuditRing>,
}

pub fn routes(state: GatewayState, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/api/optimize", post(optimize))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct OptimizeRequest {
    pub prompt: String,
    #[serde(default)]
    pub optimization_level: Option<String>,
    #[serde(default)]
    pub cost_cap_usd: Option<f64>,
    #[serde(default)]
    pub latency_cap_ms: Option<u64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub model_name: Option<String>,
}

fn parse_optimization_level(value: Option<&str>) -> OptimizationLevel {
    match value {
        Some("cheap") => OptimizationLevel::Cheap,
        Some("explore") => OptimizationLevel::Explore,
        _ => OptimizationLevel::Normal,
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error_code: &'static str,
    message: String,
    details: Vec<String>,
    retryable: bool,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.code().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = ErrorEnvelope {
            error_code: self.0.code().as_str(),
            message: self.0.to_string(),
            details: self.0.details().to_vec(),
            retryable: self.0.retryable(),
        };
        (status, Json(envelope)).into_response()
    }
}

struct GatewayError(PipelineError);

impl From<PipelineError> for GatewayError {
    fn from(err: PipelineError) -> Self {
        GatewayError(err)
    }
}

async fn optimize(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(request): Json<OptimizeRequest>,
) -> Result<Response, GatewayError> {
    let incoming_trace_id = headers
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(new_trace_id);

    let orchestrator_request = OrchestratorRequest {
        prompt: request.prompt,
        optimization_level: parse_optimization_level(request.optimization_level.as_deref()),
        cost_cap_usd: request.cost_cap_usd.unwrap_or(1.0),
        latency_cap_ms: request.latency_cap_ms.unwrap_or(10_000),
        max_tokens: request.max_tokens.unwrap_or(4000),
        model_name: request.model_name.unwrap_or_else(|| "default".to_string()),
    };

    state.metrics.incr("optimize_requests_total");
    let result: OptimizationResponse = state.orchestrator.optimize(orchestrator_request).await?;

    let mut response = Json(result).into_response();
    if let Ok(header_value) = HeaderValue::from_str(&incoming_trace_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-trace-id"), header_value);
    }
    Ok(response)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    critical_alert: bool,
}

async fn health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let start = START_TIME.get_or_init(Instant::now);
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: start.elapsed().as_secs(),
        critical_alert: state.metrics.any_critical_nonzero(),
    })
}

async fn metrics(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    let accept = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if accept.contains("text/plain") {
        state.metrics.to_prometheus_text().into_response()
    } else {
        Json(state.metrics.snapshot()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_optimization_levels() {
        assert_eq!(parse_optimization_level(Some("cheap")), OptimizationLevel::Cheap);
        assert_eq!(parse_optimization_level(Some("explore")), OptimizationLevel::Explore);
        assert_eq!(parse_optimization_level(Some("bogus")), OptimizationLevel::Normal);
        assert_eq!(parse_optimization_level(None), OptimizationLevel::Normal);
    }
}
