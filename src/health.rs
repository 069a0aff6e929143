//! Health and metrics HTTP surface
//!
//! - `GET /health`  → liveness JSON (provider configured, last heartbeat)
//! - `GET /metrics` → Prometheus text format

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::metrics;
use crate::task::AgentType;
use crate::worker::WorkerStatus;

/// Health server state
#[derive(Clone)]
pub struct HealthState {
    pub agent_type: AgentType,
    pub llm_configured: bool,
    pub status: Arc<WorkerStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub llm_configured: bool,
    pub agent_type: AgentType,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub tasks_processed: u64,
    pub busy: bool,
}

/// Create the health router
pub fn create_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let status = if state.llm_configured { "ok" } else { "degraded" };
    Json(HealthResponse {
        status,
        llm_configured: state.llm_configured,
        agent_type: state.agent_type,
        last_heartbeat: state.status.last_heartbeat(),
        tasks_processed: state.status.tasks_processed(),
        busy: state.status.is_busy(),
    })
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

/// Serve until `shutdown` turns true
pub async fn serve(
    addr: SocketAddr,
    state: HealthState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Health server listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}
