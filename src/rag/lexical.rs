//! BM25 ranking over a collection's full chunk set.
//!
//! The index is built on demand from whatever the document index returns and
//! discarded after the query; nothing is cached between requests.

use std::cmp::Ordering;

use bm25::{Document, Language, SearchEngine, SearchEngineBuilder};

use super::store::StoredChunk;
use crate::core::errors::ApiError;

pub struct LexicalIndex {
    engine: SearchEngine<u64>,
    chunks: Vec<StoredChunk>,
}

impl LexicalIndex {
    /// Document ids are positions in `chunks`, so ties resolve to insertion order.
    pub fn build(chunks: Vec<StoredChunk>) -> Self {
        let documents: Vec<Document<u64>> = chunks
            .iter()
            .enumerate()
            .map(|(position, chunk)| Document {
                id: position as u64,
                contents: chunk.content.clone(),
            })
            .collect();
        let engine = SearchEngineBuilder::<u64>::with_documents(Language::English, documents).build();

        Self { engine, chunks }
    }

    /// Tokenizing a large collection is CPU-bound; keep it off the async workers.
    pub async fn build_blocking(chunks: Vec<StoredChunk>) -> Result<Self, ApiError> {
        tokio::task::spawn_blocking(move || Self::build(chunks))
            .await
            .map_err(ApiError::internal)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Top `k` chunks with a positive BM25 score, best first.
    pub fn search(&self, query: &str, k: usize) -> Vec<(StoredChunk, f32)> {
        if k == 0 || self.chunks.is_empty() || query.trim().is_empty() {
            return Vec::new();
        }

        // Score everything, then order ourselves so equal scores are stable.
        let mut hits: Vec<(u64, f32)> = self
            .engine
            .search(query, self.chunks.len())
            .into_iter()
            .filter(|result| result.score > 0.0)
            .map(|result| (result.document.id, result.score))
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(k);

        hits.into_iter()
            .filter_map(|(id, score)| {
                self.chunks
                    .get(id as usize)
                    .map(|chunk| (chunk.clone(), score))
            })
            .collect()
    }
}
