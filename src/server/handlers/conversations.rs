use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub title: String,
    #[serde(default)]
    pub collection_ids: Vec<String>,
}

pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }

    let conversation_id = state
        .history
        .create_conversation(Some(payload.title), &payload.collection_ids)
        .await?;
    let conversation = state
        .history
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| ApiError::Internal("Created conversation vanished".to_string()))?;

    tracing::info!(conversation_id = %conversation_id, "Created conversation");
    Ok(Json(json!({ "conversation": conversation.info })))
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.history.list_conversations().await?;
    Ok(Json(json!({ "conversations": conversations })))
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .history
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Chat not found".to_string()))?;
    Ok(Json(json!({ "conversation": conversation })))
}

pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Held until the rows are gone so no request can start on this chat meanwhile.
    let _guard = state
        .pipeline
        .locks()
        .try_acquire(&conversation_id)
        .ok_or_else(|| {
            ApiError::Conflict(
                "Chat is answering a request; try again when it finishes".to_string(),
            )
        })?;
    if !state.history.delete_conversation(&conversation_id).await? {
        return Err(ApiError::NotFound("Chat not found".to_string()));
    }
    Ok(Json(json!({ "status": "success" })))
}
