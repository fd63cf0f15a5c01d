//! Axum status and manual-trigger endpoints for the roster sync scheduler.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use roster_sync::{SyncScheduler, TriggerError};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "roster-web";

#[derive(Clone)]
pub struct AppState {
    pub scheduler: SyncScheduler,
}

impl AppState {
    pub fn new(scheduler: SyncScheduler) -> Self {
        Self { scheduler }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/sync/status", get(status_handler))
        .route("/sync/run", post(run_handler))
        .with_state(Arc::new(state))
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "roster status api listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.scheduler.status().await).into_response()
}

async fn run_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.scheduler.trigger_now().await {
        Ok(stats) => Json(stats).into_response(),
        Err(err @ TriggerError::AlreadyRunning) => {
            warn!("manual roster sync rejected: already running");
            error_response(StatusCode::CONFLICT, err)
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}

fn error_response(status: StatusCode, err: TriggerError) -> Response {
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}
