//! Liveness and metrics endpoints (unauthenticated).

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use draftmill_store::QueueStore;
use serde_json::json;

use crate::{AppState, Envelope};

/// `GET /api/health` — liveness plus store connection state.
pub async fn health(State(state): State<AppState>) -> Json<Envelope> {
    let store_state = match state.store.stats().await {
        Ok(_) => "connected",
        Err(_) => "error",
    };
    Json(Envelope::ok(json!({
        "status": "ok",
        "store": store_state,
    })))
}

/// `GET /api/metrics` — Prometheus text format.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}
