//! HTTP surface (C6's router) — the external interfaces named in §6.
//!
//! Thin by design: every route either extracts a request and hands it to
//! the ingress adapter / orchestrator, or reports static/driver-derived
//! state. All scan-coordination logic lives in `orchestrator` and `cache`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Multipart, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::engines::EngineDriver;
use crate::ingress::{IngressAdapter, IngressError};
use crate::observability;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub driver: Arc<dyn EngineDriver>,
    pub ingress: Arc<IngressAdapter>,
}

pub fn build_router(state: AppState) -> Router {
    let max_file_size = state.config.max_file_size as usize;

    Router::new()
        .route("/api/v1/scan", post(scan))
        .route("/api/v1/health", get(health))
        .route("/api/v1/ready", get(ready))
        .route("/api/v1/live", get(live))
        .route("/api/v1/engines", get(engines))
        .route("/api/v1/metrics", get(metrics))
        .layer(middleware::from_fn(record_metrics))
        .layer(DefaultBodyLimit::max(max_file_size))
        .layer(RequestBodyLimitLayer::new(max_file_size))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Records every inbound request's method/path/status/duration as
/// Prometheus metrics, independent of the per-scan metrics recorded inside
/// the `scan` handler itself.
async fn record_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    observability::record_http_request(&method, &path, response.status().as_u16(), started.elapsed());
    response
}

/// Error taxonomy at the HTTP boundary (§7), mapped to a status code and a
/// stable machine-readable code, mirroring the teacher's `ApiError`. Carries
/// the inbound request's correlation id so it can be echoed back in the
/// error body, matching the teacher's `ErrorResponse.request_id` field.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    request_id: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            request_id: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "too_large", message)
    }

    fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorInfo<'a>,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
}

#[derive(Serialize)]
struct ErrorInfo<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorInfo {
                code: self.code,
                message: &self.message,
            },
            request_id: self.request_id.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<IngressError> for ApiError {
    fn from(err: IngressError) -> Self {
        tracing::error!(error = %err, "ingress write failure");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "io_write", err.to_string())
    }
}

/// Read the correlation id set by `SetRequestIdLayer` off the inbound
/// headers, if present.
fn request_id_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `POST /api/v1/scan` — multipart upload, field `file`.
#[tracing::instrument(skip(state, headers, multipart), fields(request_id = tracing::field::Empty))]
async fn scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<crate::domain::ScanResult>, ApiError> {
    let request_id = request_id_of(&headers);
    tracing::Span::current().record("request_id", &request_id);
    scan_inner(state, multipart)
        .await
        .map_err(|e| e.with_request_id(request_id))
}

async fn scan_inner(
    state: AppState,
    mut multipart: Multipart,
) -> Result<Json<crate::domain::ScanResult>, ApiError> {
    let mut file_name: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            file_name = field.file_name().map(|s| s.to_string());
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::too_large(format!("failed to read file field: {e}")))?;
            file_bytes = Some(bytes.to_vec());
        }
    }

    let file_name = file_name.ok_or_else(|| ApiError::bad_request("missing file name"))?;
    let file_bytes = file_bytes.ok_or_else(|| ApiError::bad_request("missing required field: file"))?;

    if file_bytes.len() as u64 > state.config.max_file_size {
        return Err(ApiError::too_large(format!(
            "file size {} exceeds configured maximum {}",
            file_bytes.len(),
            state.config.max_file_size
        )));
    }

    let started = std::time::Instant::now();
    let result = state.ingress.ingest(file_name, file_bytes).await?;
    observability::record_scan(result.engine, result.status, started.elapsed());

    if result.status == crate::domain::Verdict::Error {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "rts_wait_exhausted",
            "scan failed: file not accessible and no RTS detection found",
        ));
    }

    Ok(Json(result))
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    engines: Vec<crate::domain::EngineHealth>,
}

/// `GET /api/v1/health` — 200 if the active engine is healthy, 503 otherwise.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.driver.health().await;
    let healthy = health.healthy;
    let body = HealthBody {
        status: if healthy { "healthy" } else { "unhealthy" },
        engines: vec![health],
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct ReadyBody {
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// `GET /api/v1/ready`.
async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.driver.health().await;
    if health.healthy {
        (StatusCode::OK, Json(ReadyBody { ready: true, error: None }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyBody {
                ready: false,
                error: health.error,
            }),
        )
    }
}

#[derive(Serialize)]
struct LiveBody {
    alive: bool,
}

/// `GET /api/v1/live` — always 200 while the process is serving requests.
async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(LiveBody { alive: true }))
}

#[derive(Serialize)]
struct EnginesBody {
    #[serde(rename = "activeEngine")]
    active_engine: crate::domain::EngineKind,
    engines: Vec<crate::domain::EngineInfo>,
}

/// `GET /api/v1/engines`.
async fn engines(State(state): State<AppState>) -> impl IntoResponse {
    Json(EnginesBody {
        active_engine: state.driver.engine(),
        engines: vec![state.driver.info().await],
    })
}

/// `GET /api/v1/metrics` — Prometheus text exposition.
async fn metrics() -> impl IntoResponse {
    match observability::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain")],
            "metrics not initialized".to_string(),
        ),
    }
}
