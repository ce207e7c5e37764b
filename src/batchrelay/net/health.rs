use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::batchrelay::net::server::AppState;

/// GET /health/check
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Relay functioning correctly",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// GET /health/info
pub async fn relay_info(State(state): State<AppState>) -> Json<Value> {
    let handler = &state.handler;
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "id": state.config.id,
        "environment": state.config.environment,
        "connections": handler.clients.connection_count(),
        "users": handler.clients.user_count(),
        "active_batches": handler.subscriptions.batch_count(),
    }))
}
