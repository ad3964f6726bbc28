use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe plus in-flight renders per organization.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let in_flight = state.gate.snapshot();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
        "renders_in_flight": in_flight.values().sum::<usize>(),
        "renders_by_org": in_flight,
        "tick_secs": state.config.scheduler.tick_secs,
    }))
}
