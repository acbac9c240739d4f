use std::sync::Arc;

use super::error::PipelineError;
use super::prompts::contextualize_system_prompt;
use crate::core::config::GenerationSettings;
use crate::llm::{ChatMessage, ChatRequest, LlmProvider};

/// Rewrites the latest utterance into a query that stands on its own.
#[derive(Clone)]
pub struct Contextualizer {
    llm: Arc<dyn LlmProvider>,
    generation: GenerationSettings,
}

impl Contextualizer {
    pub fn new(llm: Arc<dyn LlmProvider>, generation: GenerationSettings) -> Self {
        Self { llm, generation }
    }

    pub fn build_request(&self, history: &[ChatMessage], query: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(contextualize_system_prompt(
            self.generation.response_language.as_deref(),
        )));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(query));
        ChatRequest::new(messages).with_generation(&self.generation)
    }

    /// The model is consulted even with no history; a blank reply keeps `query`.
    pub async fn rewrite(
        &self,
        history: &[ChatMessage],
        query: &str,
    ) -> Result<String, PipelineError> {
        let request = self.build_request(history, query);
        match self.llm.complete(request).await {
            Ok(rewritten) => {
                let rewritten = rewritten.trim();
                if rewritten.is_empty() {
                    return Ok(query.to_string());
                }
                tracing::debug!(original = query, rewritten, "Contextualized query");
                Ok(rewritten.to_string())
            }
            Err(err) if self.generation.contextualize_fallback => {
                tracing::warn!("Query rewrite failed, using the original query: {}", err);
                Ok(query.to_string())
            }
            Err(err) => Err(PipelineError::generation(err)),
        }
    }
}
