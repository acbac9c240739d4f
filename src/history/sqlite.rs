use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::store::{ConversationStore, Role, StoredTurn};
use crate::core::errors::ApiError;

const MAX_TITLE_LEN: usize = 160;

#[derive(Debug, Clone, Serialize)]
pub struct ConversationInfo {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub collection_ids: Vec<String>,
    pub turn_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub info: ConversationInfo,
    pub turns: Vec<StoredTurn>,
}

/// SQLite-backed conversation store.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    db_path: PathBuf,
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let connect_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(connect_options)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to open history db: {}", e)))?;

        let store = Self { db_path, pool };
        store.init_db().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn init_db(&self) -> Result<(), ApiError> {
        sqlx::query(
            "\
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL CHECK(length(trim(title)) > 0),
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "\
            CREATE TABLE IF NOT EXISTS conversation_collections (
                conversation_id TEXT NOT NULL,
                collection_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, collection_id),
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "\
            CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_conversation_id ON turns(conversation_id, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    pub async fn create_conversation(
        &self,
        title: Option<String>,
        collection_ids: &[String],
    ) -> Result<String, ApiError> {
        self.create_conversation_with_id(&Uuid::new_v4().to_string(), title, collection_ids)
            .await
    }

    /// Create a conversation under a caller-chosen id. Existing ids are left untouched.
    pub async fn create_conversation_with_id(
        &self,
        conversation_id: &str,
        title: Option<String>,
        collection_ids: &[String],
    ) -> Result<String, ApiError> {
        let title = normalize_title(title);
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("INSERT OR IGNORE INTO conversations (id, title) VALUES (?1, ?2)")
            .bind(conversation_id)
            .bind(title)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        for (position, collection_id) in collection_ids.iter().enumerate() {
            sqlx::query(
                "\
                INSERT OR IGNORE INTO conversation_collections (conversation_id, collection_id, position)
                VALUES (?1, ?2, ?3)",
            )
            .bind(conversation_id)
            .bind(collection_id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(conversation_id.to_string())
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationInfo>, ApiError> {
        let rows = sqlx::query(
            "\
            SELECT c.id, c.title, c.created_at, c.updated_at,
                   (SELECT COUNT(*) FROM turns WHERE conversation_id = c.id) as turn_count
            FROM conversations c
            ORDER BY c.updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            let mut info = conversation_info_from_row(row).map_err(ApiError::internal)?;
            info.collection_ids = self.conversation_collections(&info.id).await?;
            conversations.push(info);
        }
        Ok(conversations)
    }

    pub async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationDetail>, ApiError> {
        let row = sqlx::query(
            "\
            SELECT c.id, c.title, c.created_at, c.updated_at,
                   (SELECT COUNT(*) FROM turns WHERE conversation_id = c.id) as turn_count
            FROM conversations c
            WHERE c.id = ?1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut info = conversation_info_from_row(row).map_err(ApiError::internal)?;
        info.collection_ids = self.conversation_collections(conversation_id).await?;
        let turns = self.list_turns(conversation_id).await?;
        Ok(Some(ConversationDetail { info, turns }))
    }

    pub async fn conversation_exists(&self, conversation_id: &str) -> Result<bool, ApiError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM conversations WHERE id = ?1")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(found.is_some())
    }

    /// Deletes the conversation and, by cascade, its turns and collection links.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ConversationStore for HistoryStore {
    async fn append_turn(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<i64, ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        let result = sqlx::query(
            "INSERT INTO turns (conversation_id, role, content) VALUES (?1, ?2, ?3)",
        )
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                ApiError::NotFound(format!("Conversation {} not found", conversation_id))
            }
            other => ApiError::internal(other),
        })?;

        sqlx::query(
            "UPDATE conversations SET updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1",
        )
        .bind(conversation_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(result.last_insert_rowid())
    }

    async fn update_turn_content(&self, turn_id: i64, content: &str) -> Result<(), ApiError> {
        let result = sqlx::query("UPDATE turns SET content = ?1 WHERE id = ?2")
            .bind(content)
            .bind(turn_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("Turn {} not found", turn_id)));
        }
        Ok(())
    }

    async fn list_turns(&self, conversation_id: &str) -> Result<Vec<StoredTurn>, ApiError> {
        let rows = sqlx::query(
            "\
            SELECT id, conversation_id, role, content, created_at
            FROM turns
            WHERE conversation_id = ?1
            ORDER BY id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.into_iter().map(stored_turn_from_row).collect()
    }

    async fn conversation_collections(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<String>, ApiError> {
        sqlx::query_scalar::<_, String>(
            "\
            SELECT collection_id FROM conversation_collections
            WHERE conversation_id = ?1
            ORDER BY position ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)
    }
}

fn conversation_info_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ConversationInfo, sqlx::Error> {
    Ok(ConversationInfo {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        collection_ids: Vec::new(),
        turn_count: row.try_get("turn_count")?,
    })
}

fn stored_turn_from_row(row: sqlx::sqlite::SqliteRow) -> Result<StoredTurn, ApiError> {
    let role: String = row.try_get("role").map_err(ApiError::internal)?;
    Ok(StoredTurn {
        id: row.try_get("id").map_err(ApiError::internal)?,
        conversation_id: row.try_get("conversation_id").map_err(ApiError::internal)?,
        role: Role::from_str(&role)?,
        content: row.try_get("content").map_err(ApiError::internal)?,
        created_at: row.try_get("created_at").map_err(ApiError::internal)?,
    })
}

fn normalize_title(title: Option<String>) -> String {
    let fallback = || format!("Chat {}", Utc::now().format("%Y-%m-%d %H:%M"));

    let Some(raw) = title else {
        return fallback();
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return fallback();
    }

    trimmed.chars().take(MAX_TITLE_LEN).collect()
}
