//! HTTP/WebSocket control plane
//!
//! Read-only snapshots of the graph and derived analytics under `/v1`,
//! runtime policy-rule editing, the quarantine list, and a WebSocket push
//! stream of alerts and graph-change hints.

mod discovery;
mod policy;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::analyzer::AlertRing;
use crate::broker::Broker;
use crate::config::EngineContext;
use crate::defense::ResponseManager;
use crate::graph::GraphStore;

/// Per-request deadline; slow analytics time out with 504.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

pub struct AppState {
    pub ctx: Arc<EngineContext>,
    pub store: GraphStore,
    pub alerts: Arc<AlertRing>,
    pub response: Arc<ResponseManager>,
    pub broker: Arc<Broker>,
    pub ws_tx: tokio::sync::broadcast::Sender<String>,
    pub started_at: Instant,
    pub live_mode: bool,
}

impl AppState {
    pub fn new(
        ctx: Arc<EngineContext>,
        store: GraphStore,
        alerts: Arc<AlertRing>,
        response: Arc<ResponseManager>,
        broker: Arc<Broker>,
        live_mode: bool,
    ) -> Arc<Self> {
        let (ws_tx, _) = tokio::sync::broadcast::channel(1024);
        let state = Arc::new(Self {
            ctx,
            store,
            alerts,
            response,
            broker,
            ws_tx,
            started_at: Instant::now(),
            live_mode,
        });
        ws::spawn_forwarder(&state);
        state
    }
}

/// API error model: 4xx carry `{error}`, 5xx carry a correlation id and log
/// the full chain internally.
pub enum ApiError {
    BadRequest(String),
    NotFound,
    Conflict(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": message })),
            )
                .into_response(),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "not found" })),
            )
                .into_response(),
            ApiError::Conflict(message) => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({ "error": message })),
            )
                .into_response(),
            ApiError::Internal(err) => {
                let correlation_id = uuid::Uuid::new_v4().to_string();
                error!(%correlation_id, error = ?err, "internal API error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({
                        "error": "internal error",
                        "correlation_id": correlation_id,
                    })),
                )
                    .into_response()
            }
        }
    }
}

impl From<crate::graph::StoreError> for ApiError {
    fn from(err: crate::graph::StoreError) -> Self {
        ApiError::Internal(err.into())
    }
}

async fn with_deadline(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    match tokio::time::timeout(REQUEST_TIMEOUT, next.run(request)).await {
        Ok(response) => response,
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(serde_json::json!({ "error": "request deadline exceeded" })),
        )
            .into_response(),
    }
}

async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "mode": if state.live_mode { "live" } else { "demo" },
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/status", get(status))
        // Discovery
        .route("/v1/discovery/nodes", get(discovery::nodes))
        .route("/v1/discovery/edges", get(discovery::edges))
        .route("/v1/discovery/risk-scores", get(discovery::risk_scores))
        .route("/v1/discovery/traffic-stats", get(discovery::traffic_stats))
        // Policy & analytics
        .route("/v1/policy/alerts", get(policy::alerts))
        .route("/v1/policy/timeline", get(policy::timeline))
        .route("/v1/policy/profiles", get(policy::profiles))
        .route("/v1/policy/sessions", get(policy::sessions))
        .route("/v1/policy/dlp", get(policy::dlp))
        .route("/v1/policy/killchain", get(policy::killchain))
        .route("/v1/policy/compliance", get(policy::compliance))
        .route("/v1/policy/briefing", get(policy::briefing))
        .route("/v1/policy/report", get(policy::report))
        // Policy rules CRUD
        .route("/v1/policy/rules", get(policy::list_rules).post(policy::create_rule))
        .route("/v1/policy/rules/{id}/toggle", put(policy::toggle_rule))
        .route("/v1/policy/rules/{id}", delete(policy::delete_rule))
        // Quarantine
        .route("/v1/policy/blocked", get(policy::blocked))
        .route("/v1/policy/unblock/{ip}", post(policy::unblock))
        // Alert stream
        .route("/ws", get(ws::handler))
        .layer(axum::middleware::from_fn(with_deadline))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process exits. Bind failure is surfaced so the
/// launcher can map it to the dedicated exit code.
pub async fn serve(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "control plane listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
