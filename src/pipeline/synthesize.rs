use std::sync::Arc;

use super::error::PipelineError;
use super::prompts::{answer_system_prompt, format_context};
use crate::core::config::GenerationSettings;
use crate::llm::{ChatMessage, ChatRequest, FragmentStream, LlmProvider};
use crate::rag::Candidate;

/// Streams an answer constrained to the retrieved candidates.
#[derive(Clone)]
pub struct Synthesizer {
    llm: Arc<dyn LlmProvider>,
    generation: GenerationSettings,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmProvider>, generation: GenerationSettings) -> Self {
        Self { llm, generation }
    }

    pub fn build_request(
        &self,
        query: &str,
        candidates: &[Candidate],
        history: &[ChatMessage],
    ) -> ChatRequest {
        let context = format_context(candidates);
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(answer_system_prompt(
            &context,
            self.generation.response_language.as_deref(),
        )));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(query));
        ChatRequest::new(messages).with_generation(&self.generation)
    }

    pub async fn stream(
        &self,
        query: &str,
        candidates: &[Candidate],
        history: &[ChatMessage],
    ) -> Result<FragmentStream, PipelineError> {
        let request = self.build_request(query, candidates, history);
        tracing::debug!(
            provider = self.llm.name(),
            candidates = candidates.len(),
            "Requesting grounded answer"
        );
        self.llm
            .stream(request)
            .await
            .map_err(PipelineError::generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::StoredChunk;
    use crate::test_support::ScriptedLlm;

    fn candidate(content: &str) -> Candidate {
        Candidate {
            chunk: StoredChunk {
                chunk_id: "c1".to_string(),
                content: content.to_string(),
                source: String::new(),
                collection_id: "kb".to_string(),
                metadata: None,
            },
            score: 0.01,
            rank: 1,
        }
    }

    #[test]
    fn request_puts_context_in_single_system_message() {
        let synthesizer = Synthesizer::new(
            Arc::new(ScriptedLlm::new()),
            GenerationSettings {
                temperature: Some(0.1),
                ..GenerationSettings::default()
            },
        );
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];

        let request = synthesizer.build_request(
            "refund window?",
            &[candidate("refund policy applies within 30 days")],
            &history,
        );

        assert_eq!(request.messages.len(), 4);
        assert_eq!(request.messages[0].role, "system");
        assert!(request.messages[0]
            .content
            .contains("[1] refund policy applies within 30 days"));
        assert_eq!(request.messages.iter().filter(|m| m.role == "system").count(), 1);
        assert_eq!(request.messages[3], ChatMessage::user("refund window?"));
        assert_eq!(request.temperature, Some(0.1));
    }

    #[tokio::test]
    async fn provider_rejection_is_generation_error() {
        let synthesizer = Synthesizer::new(
            Arc::new(ScriptedLlm::new().stream_with(crate::test_support::StreamScript::Reject(
                "503 from upstream".to_string(),
            ))),
            GenerationSettings::default(),
        );

        let err = synthesizer
            .stream("q", &[candidate("text")], &[])
            .await
            .expect_err("rejected");
        assert!(matches!(err, PipelineError::Generation(_)));
    }
}
