use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::history::{Role, Turn};
use crate::pipeline::{AnswerStream, ChatInput};
use crate::server::protocol::answer_body;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessagesRequest {
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub collection_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AgentRequest {
    pub message: String,
    #[serde(default)]
    pub history: Option<Vec<IncomingMessage>>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub collection_ids: Option<Vec<String>>,
}

/// Answer the last message of a conversation thread. Streams by default.
pub async fn post_messages(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<ChatMessagesRequest>,
) -> Result<Response, ApiError> {
    ensure_conversation(&state, &conversation_id).await?;

    let mut messages = payload.messages;
    let last = messages
        .pop()
        .ok_or_else(|| ApiError::BadRequest("messages must not be empty".to_string()))?;
    if last.role != "user" {
        return Err(ApiError::BadRequest(
            "Last message must be from user".to_string(),
        ));
    }
    let query = require_text(last.content)?;

    // A lone message means "use what the server remembers".
    let history = if messages.is_empty() {
        None
    } else {
        Some(to_turns(messages))
    };

    let answer = state
        .pipeline
        .start(ChatInput {
            conversation_id,
            query,
            history,
            collection_ids: payload.collection_ids,
        })
        .await?;

    if payload.stream.unwrap_or(true) {
        Ok(streaming_response(answer))
    } else {
        let reply = answer.collect().await?;
        Ok(Json(json!({ "reply": reply })).into_response())
    }
}

/// Single-shot endpoint for integrations; always answers with `{"reply"}`.
pub async fn agent_request(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AgentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = match payload.conversation_id {
        Some(conversation_id) => {
            ensure_conversation(&state, &conversation_id).await?;
            conversation_id
        }
        // Recreated on demand, so deleting it through the chat API is harmless.
        None => state.ensure_default_conversation().await?.ok_or_else(|| {
            ApiError::BadRequest(
                "conversation_id is required when no default conversation is configured"
                    .to_string(),
            )
        })?,
    };
    let query = require_text(payload.message)?;

    let answer = state
        .pipeline
        .start(ChatInput {
            conversation_id,
            query,
            history: payload.history.map(to_turns),
            collection_ids: payload.collection_ids,
        })
        .await?;

    let reply = answer.collect().await?;
    Ok(Json(json!({ "reply": reply })))
}

fn streaming_response(answer: AnswerStream) -> Response {
    tracing::debug!(conversation_id = answer.conversation_id(), "Streaming answer");
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        answer_body(answer),
    )
        .into_response()
}

async fn ensure_conversation(state: &AppState, conversation_id: &str) -> Result<(), ApiError> {
    if state.history.conversation_exists(conversation_id).await? {
        Ok(())
    } else {
        Err(ApiError::NotFound("Chat not found".to_string()))
    }
}

fn require_text(content: String) -> Result<String, ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::BadRequest("message content must not be empty".to_string()));
    }
    Ok(content)
}

/// Messages with roles other than user/assistant (e.g. system) are dropped.
fn to_turns(messages: Vec<IncomingMessage>) -> Vec<Turn> {
    messages
        .into_iter()
        .filter_map(|message| {
            Role::from_str(&message.role).ok().map(|role| Turn {
                role,
                content: message.content,
            })
        })
        .collect()
}
