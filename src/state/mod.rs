use std::sync::Arc;

use crate::core::config::{AppPaths, ConfigService, RagSettings};
use crate::core::errors::ApiError;
use crate::history::{ConversationAdapter, HistoryStore};
use crate::llm::{EmbeddingProvider, LlmProvider, OpenAiCompatProvider};
use crate::pipeline::{Contextualizer, ConversationLocks, RagPipeline, Synthesizer};
use crate::rag::{DocumentIndex, HybridRetriever, SqliteRagStore};

pub mod error;

use error::InitializationError;

const DEFAULT_CONVERSATION_TITLE: &str = "Agent requests";

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub settings: RagSettings,
    pub history: Arc<HistoryStore>,
    pub rag_store: Arc<dyn DocumentIndex>,
    pub llm: Arc<dyn LlmProvider>,
    pub pipeline: RagPipeline,
}

impl AppState {
    /// Initializes the application state.
    ///
    /// 1. Resolve paths and load configuration
    /// 2. Open the history and RAG databases
    /// 3. Build the model clients and the answer pipeline
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        Self::initialize_with(Arc::new(AppPaths::new())).await
    }

    pub async fn initialize_with(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        std::fs::create_dir_all(&paths.user_data_dir)
            .map_err(|e| InitializationError::Config(e.into()))?;

        let config = ConfigService::new(paths.clone());
        let settings = config
            .load_settings()
            .map_err(|e| InitializationError::Config(e.into()))?;

        let history = Arc::new(
            HistoryStore::new(paths.db_path.clone())
                .await
                .map_err(|e| InitializationError::History(e.into()))?,
        );

        let llm = Arc::new(
            OpenAiCompatProvider::new(&settings.llm)
                .map_err(|e| InitializationError::Llm(e.into()))?,
        );
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            OpenAiCompatProvider::new(&settings.embedding)
                .map_err(|e| InitializationError::Llm(e.into()))?,
        );

        let rag_store = Arc::new(
            SqliteRagStore::new(paths.rag_db_path.clone(), embedder)
                .await
                .map_err(|e| InitializationError::Rag(e.into()))?,
        );

        tracing::info!(
            llm = %settings.llm.base_url,
            model = %settings.llm.model,
            embedding_model = %settings.embedding.model,
            fan_out = settings.retrieval.fan_out,
            "Application state initialized"
        );

        let state = Self::from_parts(paths, config, settings, history, rag_store, llm);
        if let Some(conversation_id) = state
            .ensure_default_conversation()
            .await
            .map_err(|e| InitializationError::History(e.into()))?
        {
            tracing::info!(conversation_id = %conversation_id, "Default conversation ready");
        }
        Ok(state)
    }

    /// Create `server.default_conversation_id` if it is configured and missing,
    /// linking `server.default_collection_ids`. Returns the id when configured.
    pub async fn ensure_default_conversation(&self) -> Result<Option<String>, ApiError> {
        let server = &self.settings.server;
        let Some(conversation_id) = server.default_conversation_id.as_deref() else {
            return Ok(None);
        };
        self.history
            .create_conversation_with_id(
                conversation_id,
                Some(DEFAULT_CONVERSATION_TITLE.to_string()),
                &server.default_collection_ids,
            )
            .await
            .map(Some)
    }

    /// Wire the pipeline from already-built stores and providers.
    pub fn from_parts(
        paths: Arc<AppPaths>,
        config: ConfigService,
        settings: RagSettings,
        history: Arc<HistoryStore>,
        rag_store: Arc<dyn DocumentIndex>,
        llm: Arc<dyn LlmProvider>,
    ) -> Arc<Self> {
        let pipeline = RagPipeline::new(
            ConversationAdapter::new(history.clone()),
            HybridRetriever::new(rag_store.clone(), settings.retrieval.clone()),
            Contextualizer::new(llm.clone(), settings.generation.clone()),
            Synthesizer::new(llm.clone(), settings.generation.clone()),
            ConversationLocks::new(),
        );

        Arc::new(AppState {
            paths,
            config,
            settings,
            history,
            rag_store,
            llm,
            pipeline,
        })
    }
}
