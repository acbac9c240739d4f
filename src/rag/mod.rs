//! Retrieval: document index, BM25 ranking and hybrid rank fusion.

pub mod fusion;
pub mod lexical;
pub mod retriever;
pub mod sqlite;
pub mod store;

pub use fusion::{weighted_rank_fusion, RankedList, RRF_C};
pub use lexical::LexicalIndex;
pub use retriever::{Candidate, FusionWeights, HybridRetriever, RetrievalOutcome};
pub use sqlite::SqliteRagStore;
pub use store::{ChunkSearchResult, DocumentIndex, StoredChunk};
