//! SQLite-backed document index.
//!
//! Chunk text and metadata live in SQLite alongside their embeddings;
//! similarity search is brute-force cosine over one collection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::store::{ChunkSearchResult, DocumentIndex, StoredChunk};
use crate::core::errors::ApiError;
use crate::llm::EmbeddingProvider;

pub struct SqliteRagStore {
    pool: SqlitePool,
    db_path: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SqliteRagStore {
    pub async fn new(
        db_path: PathBuf,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self {
            pool,
            db_path,
            embedder,
        };
        store.init_schema().await?;
        store.record_embedding_model().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        // Databases created before chunk ids were scoped per collection keyed
        // `rag_chunks` on `chunk_id` alone.
        let key_columns: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info('rag_chunks') WHERE pk > 0")
                .fetch_one(&mut *tx)
                .await
                .map_err(ApiError::internal)?;
        let legacy = key_columns == 1;
        if legacy {
            tracing::info!("Upgrading rag_chunks to per-collection chunk ids");
            sqlx::query("DROP INDEX IF EXISTS idx_rag_collection")
                .execute(&mut *tx)
                .await
                .map_err(ApiError::internal)?;
            sqlx::query("ALTER TABLE rag_chunks RENAME TO rag_chunks_legacy")
                .execute(&mut *tx)
                .await
                .map_err(ApiError::internal)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rag_chunks (
                chunk_id TEXT NOT NULL,
                content TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                collection_id TEXT NOT NULL,
                metadata TEXT DEFAULT '{}',
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (collection_id, chunk_id)
            )",
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        if legacy {
            sqlx::query(
                "INSERT INTO rag_chunks (chunk_id, content, source, collection_id, metadata, embedding, created_at)
                 SELECT chunk_id, content, source, collection_id, metadata, embedding, created_at
                 FROM rag_chunks_legacy
                 ORDER BY rowid ASC",
            )
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
            sqlx::query("DROP TABLE rag_chunks_legacy")
                .execute(&mut *tx)
                .await
                .map_err(ApiError::internal)?;
        }

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_rag_collection ON rag_chunks(collection_id)",
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rag_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Vectors from another embedding model are not comparable; flag it loudly.
    async fn record_embedding_model(&self) -> Result<(), ApiError> {
        let current = self.embedder.model_name().to_string();
        let previous: Option<String> =
            sqlx::query_scalar("SELECT value FROM rag_meta WHERE key = 'embedding_model'")
                .fetch_optional(&self.pool)
                .await
                .map_err(ApiError::internal)?;

        if let Some(previous) = previous.filter(|previous| *previous != current) {
            tracing::warn!(
                "Embedding model changed from {} to {}; re-index collections for accurate vector search",
                previous,
                current
            );
        }

        sqlx::query(
            "INSERT OR REPLACE INTO rag_meta (key, value, updated_at)
             VALUES ('embedding_model', ?1, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
        )
        .bind(&current)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> StoredChunk {
        let metadata_str: String = row.get("metadata");
        let metadata = serde_json::from_str::<Value>(&metadata_str)
            .ok()
            .filter(|value| !value.as_object().is_some_and(|map| map.is_empty()));

        StoredChunk {
            chunk_id: row.get("chunk_id"),
            content: row.get("content"),
            source: row.get("source"),
            collection_id: row.get("collection_id"),
            metadata,
        }
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[async_trait]
impl DocumentIndex for SqliteRagStore {
    async fn insert_batch(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for (chunk, embedding) in &items {
            let blob = Self::serialize_embedding(embedding);
            let metadata_str = match &chunk.metadata {
                Some(metadata) => serde_json::to_string(metadata).map_err(ApiError::internal)?,
                None => "{}".to_string(),
            };

            sqlx::query(
                "INSERT OR REPLACE INTO rag_chunks (chunk_id, content, source, collection_id, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.content)
            .bind(&chunk.source)
            .bind(&chunk.collection_id)
            .bind(&metadata_str)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn index_chunks(&self, chunks: Vec<StoredChunk>) -> Result<usize, ApiError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(ApiError::Internal(format!(
                "Embedding provider returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let count = chunks.len();
        self.insert_batch(chunks.into_iter().zip(embeddings).collect())
            .await?;
        tracing::info!("Indexed {} chunks", count);
        Ok(count)
    }

    async fn vector_search(
        &self,
        collection_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkSearchResult>, ApiError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Internal("Embedding provider returned no vector".into()))?;

        let rows = sqlx::query(
            "SELECT chunk_id, content, source, collection_id, metadata, embedding
             FROM rag_chunks
             WHERE collection_id = ?1
             ORDER BY rowid ASC",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut scored: Vec<ChunkSearchResult> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Vec<u8> = row
                    .try_get::<Option<Vec<u8>>, _>("embedding")
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                if embedding_bytes.is_empty() {
                    return None;
                }
                let stored_emb = Self::deserialize_embedding(&embedding_bytes);
                let score = cosine_similarity(&query_embedding, &stored_emb);

                Some(ChunkSearchResult {
                    chunk: Self::row_to_chunk(row),
                    score,
                })
            })
            .collect();

        // Stable sort: equal scores keep insertion order.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);

        Ok(scored)
    }

    async fn list_all_chunks(&self, collection_id: &str) -> Result<Vec<StoredChunk>, ApiError> {
        let rows = sqlx::query(
            "SELECT chunk_id, content, source, collection_id, metadata
             FROM rag_chunks
             WHERE collection_id = ?1
             ORDER BY rowid ASC",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }

    async fn count(&self, collection_id: &str) -> Result<usize, ApiError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rag_chunks WHERE collection_id = ?1")
                .bind(collection_id)
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal)?;

        Ok(count as usize)
    }

    async fn delete_collection(&self, collection_id: &str) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM rag_chunks WHERE collection_id = ?1")
            .bind(collection_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::HashEmbedder;

    async fn test_store(dir: &tempfile::TempDir) -> SqliteRagStore {
        SqliteRagStore::new(dir.path().join("rag.db"), Arc::new(HashEmbedder::default()))
            .await
            .unwrap()
    }

    fn make_chunk(id: &str, content: &str, collection: &str) -> StoredChunk {
        StoredChunk {
            chunk_id: id.to_string(),
            content: content.to_string(),
            source: "doc".to_string(),
            collection_id: collection.to_string(),
            metadata: Some(serde_json::json!({ "position": 0 })),
        }
    }

    #[tokio::test]
    async fn index_and_vector_search_within_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        store
            .index_chunks(vec![
                make_chunk("c1", "refund policy applies within 30 days", "kb1"),
                make_chunk("c2", "shipping takes a week", "kb1"),
                make_chunk("c3", "refund policy for another tenant", "kb2"),
            ])
            .await
            .unwrap();

        let results = store.vector_search("kb1", "refund policy", 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.chunk_id, "c1");
        assert!(results.iter().all(|r| r.chunk.collection_id == "kb1"));
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn list_count_and_delete_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        store
            .index_chunks(vec![
                make_chunk("a", "first", "kb1"),
                make_chunk("b", "second", "kb1"),
                make_chunk("c", "other", "kb2"),
            ])
            .await
            .unwrap();

        let ids: Vec<String> = store
            .list_all_chunks("kb1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.chunk_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.count("kb2").await.unwrap(), 1);
        assert_eq!(store.count("missing").await.unwrap(), 0);

        assert_eq!(store.delete_collection("kb1").await.unwrap(), 2);
        assert_eq!(store.count("kb1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn metadata_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        store
            .index_chunks(vec![make_chunk("m", "with metadata", "kb")])
            .await
            .unwrap();

        let chunk = store.list_all_chunks("kb").await.unwrap().remove(0);
        assert_eq!(chunk.metadata, Some(serde_json::json!({ "position": 0 })));
    }

    #[tokio::test]
    async fn same_chunk_id_is_scoped_to_its_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        store
            .index_chunks(vec![make_chunk("doc-1#0", "tenant a terms", "tenant_a")])
            .await
            .unwrap();
        store
            .index_chunks(vec![make_chunk("doc-1#0", "tenant b terms", "tenant_b")])
            .await
            .unwrap();

        assert_eq!(store.count("tenant_a").await.unwrap(), 1);
        assert_eq!(store.count("tenant_b").await.unwrap(), 1);
        let kept = store.list_all_chunks("tenant_a").await.unwrap();
        assert_eq!(kept[0].content, "tenant a terms");

        // Re-indexing within one collection still replaces.
        store
            .index_chunks(vec![make_chunk("doc-1#0", "tenant a revised", "tenant_a")])
            .await
            .unwrap();
        let revised = store.list_all_chunks("tenant_a").await.unwrap();
        assert_eq!(revised.len(), 1);
        assert_eq!(revised[0].content, "tenant a revised");
    }

    #[tokio::test]
    async fn legacy_single_key_table_is_upgraded() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("rag.db");
        {
            let pool = SqlitePoolOptions::new()
                .connect_with(
                    SqliteConnectOptions::new()
                        .filename(&db_path)
                        .create_if_missing(true),
                )
                .await
                .unwrap();
            sqlx::query(
                "CREATE TABLE rag_chunks (
                    chunk_id TEXT PRIMARY KEY,
                    content TEXT NOT NULL,
                    source TEXT NOT NULL DEFAULT '',
                    collection_id TEXT NOT NULL,
                    metadata TEXT DEFAULT '{}',
                    embedding BLOB,
                    created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
                )",
            )
            .execute(&pool)
            .await
            .unwrap();
            sqlx::query(
                "INSERT INTO rag_chunks (chunk_id, content, collection_id) VALUES ('x', 'kept', 'kb1')",
            )
            .execute(&pool)
            .await
            .unwrap();
            pool.close().await;
        }

        let store = SqliteRagStore::new(db_path, Arc::new(HashEmbedder::default()))
            .await
            .unwrap();
        assert_eq!(store.count("kb1").await.unwrap(), 1);

        store
            .index_chunks(vec![make_chunk("x", "other tenant", "kb2")])
            .await
            .unwrap();
        assert_eq!(store.count("kb1").await.unwrap(), 1);
        assert_eq!(store.count("kb2").await.unwrap(), 1);
    }

    #[test]
    fn cosine_handles_mismatched_and_zero_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }
}
