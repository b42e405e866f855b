use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health: liveness probe, returns server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git_sha": env!("VIGIL_GIT_SHA"),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
        "scheduler_enabled": state.config.scheduler.enabled,
    }))
}
