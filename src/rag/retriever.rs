use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use super::fusion::{weighted_rank_fusion, RankedList};
use super::lexical::LexicalIndex;
use super::store::{DocumentIndex, StoredChunk};
use crate::core::config::RetrievalSettings;
use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub vector: f64,
    pub lexical: f64,
}

impl From<&RetrievalSettings> for FusionWeights {
    fn from(settings: &RetrievalSettings) -> Self {
        Self {
            vector: settings.vector_weight,
            lexical: settings.lexical_weight,
        }
    }
}

/// A chunk selected as grounding context. `rank` is 1-based.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub chunk: StoredChunk,
    pub score: f64,
    pub rank: usize,
}

#[derive(Debug, Clone)]
pub enum RetrievalOutcome {
    /// None of the requested collections has indexed content.
    NoKnowledge,
    /// Content exists but nothing matched the query.
    NoRelevant,
    Candidates(Vec<Candidate>),
}

/// Chunk ids are only unique within a collection.
type ChunkKey = (String, String);

fn chunk_key(chunk: &StoredChunk) -> ChunkKey {
    (chunk.collection_id.clone(), chunk.chunk_id.clone())
}

/// Vector and BM25 retrieval fused with weighted reciprocal rank fusion.
#[derive(Clone)]
pub struct HybridRetriever {
    index: Arc<dyn DocumentIndex>,
    settings: RetrievalSettings,
}

impl HybridRetriever {
    pub fn new(index: Arc<dyn DocumentIndex>, settings: RetrievalSettings) -> Self {
        Self { index, settings }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Requested collections that hold at least one chunk, in request order,
    /// without duplicates.
    pub async fn indexed_collections(
        &self,
        collection_ids: &[String],
    ) -> Result<Vec<String>, ApiError> {
        let mut seen = HashSet::new();
        let mut indexed = Vec::new();
        for collection_id in collection_ids {
            if !seen.insert(collection_id.as_str()) {
                continue;
            }
            if self.index.count(collection_id).await? > 0 {
                indexed.push(collection_id.clone());
            } else {
                tracing::debug!(collection_id = %collection_id, "Skipping empty collection");
            }
        }
        Ok(indexed)
    }

    pub async fn retrieve(
        &self,
        query: &str,
        collection_ids: &[String],
    ) -> Result<RetrievalOutcome, ApiError> {
        let indexed = self.indexed_collections(collection_ids).await?;
        if indexed.is_empty() {
            return Ok(RetrievalOutcome::NoKnowledge);
        }
        self.retrieve_from(query, &indexed).await
    }

    /// Retrieve from collections already known to hold content.
    pub async fn retrieve_from(
        &self,
        query: &str,
        indexed_collections: &[String],
    ) -> Result<RetrievalOutcome, ApiError> {
        let targets: &[String] = if self.settings.fan_out {
            indexed_collections
        } else {
            &indexed_collections[..indexed_collections.len().min(1)]
        };
        if targets.is_empty() {
            return Ok(RetrievalOutcome::NoKnowledge);
        }

        let k = self.settings.top_k;
        let weights = FusionWeights::from(&self.settings);
        let mut chunks_by_key: HashMap<ChunkKey, StoredChunk> = HashMap::new();
        let mut vector_lists = Vec::with_capacity(targets.len());
        let mut lexical_lists = Vec::with_capacity(targets.len());

        for collection_id in targets {
            let vector_hits = self.index.vector_search(collection_id, query, k).await?;
            let vector_keys = vector_hits
                .into_iter()
                .map(|hit| {
                    let key = chunk_key(&hit.chunk);
                    chunks_by_key.entry(key.clone()).or_insert(hit.chunk);
                    key
                })
                .collect::<Vec<_>>();

            let all_chunks = self.index.list_all_chunks(collection_id).await?;
            let lexical = LexicalIndex::build_blocking(all_chunks).await?;
            let lexical_keys = lexical
                .search(query, k)
                .into_iter()
                .map(|(chunk, _)| {
                    let key = chunk_key(&chunk);
                    chunks_by_key.entry(key.clone()).or_insert(chunk);
                    key
                })
                .collect::<Vec<_>>();

            tracing::debug!(
                collection_id = %collection_id,
                vector_hits = vector_keys.len(),
                lexical_hits = lexical_keys.len(),
                corpus = lexical.len(),
                "Collected retrieval candidates"
            );

            vector_lists.push(RankedList::new(weights.vector, vector_keys));
            lexical_lists.push(RankedList::new(weights.lexical, lexical_keys));
        }

        // Vector lists first so ties favour vector order.
        vector_lists.extend(lexical_lists);
        let fused = weighted_rank_fusion(&vector_lists, self.settings.rrf_c, k);

        let candidates: Vec<Candidate> = fused
            .into_iter()
            .enumerate()
            .filter_map(|(position, (key, score))| {
                chunks_by_key.remove(&key).map(|chunk| Candidate {
                    chunk,
                    score,
                    rank: position + 1,
                })
            })
            .collect();

        if candidates.is_empty() {
            return Ok(RetrievalOutcome::NoRelevant);
        }
        Ok(RetrievalOutcome::Candidates(candidates))
    }
}
