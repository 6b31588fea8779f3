//! Presence lookups

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use crate::config::AppState;
use crate::error::Result;

/// GET /api/users/online
///
/// Identities holding a live channel on this server right now.
pub async fn list_online_users(State(state): State<AppState>) -> Json<Value> {
    let users: Vec<String> = state.registry.snapshot_identities().into_iter().collect();
    info!("Retrieved {} online users", users.len());

    Json(json!({
        "success": true,
        "count": users.len(),
        "users": users,
    }))
}

/// GET /api/users/{user_id}/presence
///
/// `isOnline` and `joinedAt` come from the live registry; `lastSeen` from the
/// store. Both timestamps are null when unknown.
pub async fn get_presence(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>> {
    let record = state.store.presence(&user_id).await?;
    let session = state.registry.session(&user_id);

    Ok(Json(json!({
        "success": true,
        "presence": {
            "userId": user_id,
            "isOnline": session.is_some(),
            "joinedAt": session.map(|s| s.joined_at),
            "lastSeen": record.map(|r| r.last_seen),
        }
    })))
}
