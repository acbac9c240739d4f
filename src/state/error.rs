use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to initialize history store: {0}")]
    History(#[source] anyhow::Error),

    #[error("Failed to initialize RAG store: {0}")]
    Rag(#[source] anyhow::Error),

    #[error("Failed to initialize LLM provider: {0}")]
    Llm(#[source] anyhow::Error),
}
