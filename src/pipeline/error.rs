use thiserror::Error;

use crate::core::errors::ApiError;

/// Failures of one RAG request cycle.
///
/// Missing grounding is not an error; it yields a fixed reply instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("retrieval failed: {0}")]
    Retrieval(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("conversation store unavailable: {0}")]
    Persistence(ApiError),
    #[error("conversation {0} is already answering another request")]
    Busy(String),
}

impl PipelineError {
    pub fn retrieval(err: ApiError) -> Self {
        PipelineError::Retrieval(err.message())
    }

    pub fn generation(err: ApiError) -> Self {
        PipelineError::Generation(err.message())
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Busy(_) => ApiError::Conflict(err.to_string()),
            PipelineError::Persistence(ApiError::NotFound(msg)) => ApiError::NotFound(msg),
            PipelineError::Persistence(inner) => ApiError::Internal(inner.message()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
