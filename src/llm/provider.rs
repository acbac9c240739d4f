use async_trait::async_trait;

use super::stream::FragmentStream;
use super::types::ChatRequest;
use crate::core::errors::ApiError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// provider name for logs (e.g. "openai-compat")
    fn name(&self) -> &str;

    /// chat completion (non-streaming)
    async fn complete(&self, request: ChatRequest) -> Result<String, ApiError>;

    /// chat completion (streaming); the request itself failing is the outer error
    async fn stream(&self, request: ChatRequest) -> Result<FragmentStream, ApiError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// one vector per input, same order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;
}
