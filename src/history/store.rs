//! Conversation store abstraction used by the pipeline.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// Speaker of a persisted turn. Never changes once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" | "human" => Ok(Role::User),
            "assistant" | "ai" => Ok(Role::Assistant),
            other => Err(ApiError::BadRequest(format!("Unknown role: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredTurn {
    pub id: i64,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

impl From<StoredTurn> for Turn {
    fn from(stored: StoredTurn) -> Self {
        Turn {
            role: stored.role,
            content: stored.content,
        }
    }
}

/// Persistence boundary for turns.
///
/// Turns are append-only; `update_turn_content` exists for the single
/// in-flight assistant turn of a request.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append_turn(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<i64, ApiError>;

    async fn update_turn_content(&self, turn_id: i64, content: &str) -> Result<(), ApiError>;

    /// Turns of a conversation, oldest first.
    async fn list_turns(&self, conversation_id: &str) -> Result<Vec<StoredTurn>, ApiError>;

    /// Collection ids linked to a conversation, in link order.
    async fn conversation_collections(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<String>, ApiError>;
}
