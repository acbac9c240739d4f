//! Document index abstraction for the retrieval pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// A retrievable chunk of a collection's documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Unique across all collections.
    pub chunk_id: String,
    pub content: String,
    /// Source document identifier (filename, URL, ...).
    #[serde(default)]
    pub source: String,
    pub collection_id: String,
    /// Opaque metadata such as position in the source document.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Result of a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSearchResult {
    pub chunk: StoredChunk,
    /// Cosine similarity (higher = better).
    pub score: f32,
}

/// Per-collection store supporting vector lookup and raw-text listing.
///
/// Implementations own the embedding step: callers pass text, never vectors,
/// except through `insert_batch`.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Insert chunks with precomputed embeddings. Existing ids are replaced.
    async fn insert_batch(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError>;

    /// Embed and insert chunks. Returns the number indexed.
    async fn index_chunks(&self, chunks: Vec<StoredChunk>) -> Result<usize, ApiError>;

    /// Top `limit` chunks of a collection by similarity to `query`, best first.
    async fn vector_search(
        &self,
        collection_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkSearchResult>, ApiError>;

    /// Every chunk of a collection, in insertion order.
    async fn list_all_chunks(&self, collection_id: &str) -> Result<Vec<StoredChunk>, ApiError>;

    async fn count(&self, collection_id: &str) -> Result<usize, ApiError>;

    async fn delete_collection(&self, collection_id: &str) -> Result<usize, ApiError>;
}
