//! Message history handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::AppState;
use crate::error::{RelayError, Result};

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// GET /api/messages/{sender_id}/{receiver_id}
pub async fn get_conversation(
    Path((sender_id, receiver_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<Value>> {
    let messages = state.store.conversation(&sender_id, &receiver_id).await?;
    info!(
        "Retrieved {} messages between {} and {}",
        messages.len(),
        sender_id,
        receiver_id
    );

    Ok(Json(json!({
        "success": true,
        "count": messages.len(),
        "messages": messages,
    })))
}

/// GET /api/messages/recent/{user_id}?limit=N
pub async fn get_recent_messages(
    Path(user_id): Path<String>,
    Query(query): Query<RecentQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>> {
    let limit = state.config.page_size(query.limit);
    let messages = state.store.recent_messages(&user_id, limit).await?;
    info!("Retrieved {} recent messages for user {}", messages.len(), user_id);

    Ok(Json(json!({
        "success": true,
        "count": messages.len(),
        "messages": messages,
    })))
}

/// GET /api/messages/stats/{user_id}
pub async fn get_message_stats(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>> {
    let stats = state.store.message_stats(&user_id).await?;
    info!("Retrieved message stats for user {}", user_id);

    Ok(Json(json!({ "success": true, "stats": stats })))
}

/// POST /api/messages
///
/// Stores the message without pushing it to live channels.
pub async fn create_message(
    State(state): State<AppState>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let message = state
        .relay
        .record(
            req.sender_id.as_deref(),
            req.receiver_id.as_deref(),
            req.message.as_deref(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": message })),
    ))
}

/// DELETE /api/messages/{message_id}/{user_id}
pub async fn delete_message(
    Path((message_id, user_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<Value>> {
    let deleted = state
        .store
        .delete_message(&message_id, &user_id)
        .await?
        .ok_or_else(|| RelayError::NotFound("Message not found or unauthorized".to_string()))?;

    info!("Message deleted: {} by user {}", message_id, user_id);
    Ok(Json(json!({
        "success": true,
        "message": "Message deleted successfully",
        "deletedMessage": deleted,
    })))
}
