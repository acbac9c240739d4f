use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::rag::StoredChunk;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChunkInput {
    #[serde(default)]
    pub chunk_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct IndexChunksRequest {
    pub chunks: Vec<ChunkInput>,
}

/// Embed and store pre-chunked text. Chunking itself happens upstream.
pub async fn index_chunks(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<String>,
    Json(payload): Json<IndexChunksRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.chunks.is_empty() {
        return Err(ApiError::BadRequest("chunks must not be empty".to_string()));
    }

    let mut chunks = Vec::with_capacity(payload.chunks.len());
    for (position, input) in payload.chunks.into_iter().enumerate() {
        if input.content.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "chunks[{}].content must not be empty",
                position
            )));
        }
        chunks.push(StoredChunk {
            chunk_id: input
                .chunk_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            content: input.content,
            source: input.source.unwrap_or_default(),
            collection_id: collection_id.clone(),
            metadata: input.metadata,
        });
    }

    let indexed = state.rag_store.index_chunks(chunks).await?;
    Ok(Json(json!({ "collection_id": collection_id, "indexed": indexed })))
}

pub async fn get_collection(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let chunk_count = state.rag_store.count(&collection_id).await?;
    Ok(Json(json!({ "collection_id": collection_id, "chunk_count": chunk_count })))
}

pub async fn delete_collection(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.rag_store.delete_collection(&collection_id).await?;
    Ok(Json(json!({ "collection_id": collection_id, "deleted": deleted })))
}
