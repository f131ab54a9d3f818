//! System endpoints: health check.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::app_state::AppState;
use crate::service::ListenerState;

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    version: &'static str,
    listener: ListenerState,
    subscribers: usize,
}

/// `GET /health` — Service health status.
///
/// Reports `503` once the change listener has failed, since live updates
/// have stopped.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let listener = *state.listener_state.borrow();
    let (code, status) = if listener == ListenerState::Failed {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "healthy")
    };
    (
        code,
        Json(HealthResponse {
            status,
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
            listener,
            subscribers: state.hub.len().await,
        }),
    )
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
