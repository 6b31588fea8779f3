use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::AppState;

/// GET /api/health
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let database = match state.store.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            warn!(error = %e, "health check could not reach the store");
            "disconnected"
        }
    };

    let uptime = (Utc::now() - state.started_at).num_seconds().max(0);
    info!("Health check requested");

    Json(json!({
        "status": "OK",
        "message": "Chat relay is running",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": format!("{}m {}s", uptime / 60, uptime % 60),
        "database": { "status": database },
        "onlineUsers": state.registry.online_count(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
