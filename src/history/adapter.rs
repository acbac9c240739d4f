//! Records the two turns of a request and turns stored history into model
//! messages.

use std::sync::Arc;

use super::store::{ConversationStore, Role, Turn};
use crate::core::errors::ApiError;
use crate::llm::ChatMessage;

/// Separator some clients leave in assistant turns; only the text after the
/// last occurrence is the actual answer.
pub const RESPONSE_MARKER: &str = "__LLM_RESPONSE__";

pub const CANCELLED_NOTE: &str = "Response cancelled before completion.";

const ERROR_PREFIX: &str = "Error generating response";

/// Ids of the turns opened by [`ConversationAdapter::begin_turn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnHandle {
    pub conversation_id: String,
    pub user_turn_id: i64,
    pub assistant_turn_id: i64,
}

/// How a request cycle ended, carrying what should be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed(String),
    /// Human-readable failure description, without the error prefix.
    Failed(String),
    /// Text accumulated before the caller went away.
    Cancelled(String),
}

impl TurnOutcome {
    /// Final assistant turn content. Never empty.
    pub fn into_content(self) -> String {
        match self {
            TurnOutcome::Completed(text) if !text.trim().is_empty() => text,
            TurnOutcome::Completed(_) => error_description("the model returned an empty answer"),
            TurnOutcome::Failed(description) => error_description(&description),
            TurnOutcome::Cancelled(text) if !text.is_empty() => text,
            TurnOutcome::Cancelled(_) => CANCELLED_NOTE.to_string(),
        }
    }
}

pub fn error_description(description: &str) -> String {
    format!("{}: {}", ERROR_PREFIX, description)
}

#[derive(Clone)]
pub struct ConversationAdapter {
    store: Arc<dyn ConversationStore>,
}

impl ConversationAdapter {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Persist the user turn, then an empty assistant placeholder.
    pub async fn begin_turn(
        &self,
        conversation_id: &str,
        query: &str,
    ) -> Result<TurnHandle, ApiError> {
        let user_turn_id = self
            .store
            .append_turn(conversation_id, Role::User, query)
            .await?;
        let assistant_turn_id = self
            .store
            .append_turn(conversation_id, Role::Assistant, "")
            .await?;

        tracing::debug!(
            conversation_id,
            user_turn_id,
            assistant_turn_id,
            "Opened conversation turn"
        );

        Ok(TurnHandle {
            conversation_id: conversation_id.to_string(),
            user_turn_id,
            assistant_turn_id,
        })
    }

    /// Overwrite the placeholder with the outcome's content and return it.
    pub async fn finalize_turn(
        &self,
        handle: &TurnHandle,
        outcome: TurnOutcome,
    ) -> Result<String, ApiError> {
        let content = outcome.into_content();
        self.store
            .update_turn_content(handle.assistant_turn_id, &content)
            .await?;
        Ok(content)
    }

    pub async fn history(&self, conversation_id: &str) -> Result<Vec<Turn>, ApiError> {
        let turns = self.store.list_turns(conversation_id).await?;
        Ok(turns.into_iter().map(Turn::from).collect())
    }

    pub async fn collections(&self, conversation_id: &str) -> Result<Vec<String>, ApiError> {
        self.store.conversation_collections(conversation_id).await
    }
}

/// Map prior turns to role-tagged model messages. Empty assistant turns
/// (unfinished placeholders) are dropped.
pub fn reduce_history(turns: &[Turn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .filter_map(|turn| match turn.role {
            Role::User => Some(ChatMessage::user(turn.content.clone())),
            Role::Assistant => {
                let answer = strip_response_marker(&turn.content);
                (!answer.is_empty()).then(|| ChatMessage::assistant(answer))
            }
        })
        .collect()
}

pub fn strip_response_marker(content: &str) -> &str {
    content
        .rsplit(RESPONSE_MARKER)
        .next()
        .unwrap_or(content)
        .trim()
}
