//! Message service: the store behind chat persistence and the REST resource.
//!
//! DESIGN
//! ======
//! `MessageStore` is the seam between the relay and storage. `PgMessageStore`
//! backs production; `MemoryMessageStore` serves tests and database-less
//! development runs. Both assign the id and timestamp on create, so the
//! record a room receives is always the stored one.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::{ChatMessage, OutgoingMessage, UNKNOWN_USER, now_ms};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("message not found: {0}")]
    NotFound(Uuid),
    #[error("invalid message: {0}")]
    Invalid(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: Uuid,
    pub project_id: String,
    pub user_id: Option<String>,
    /// Display name at send time.
    pub user: String,
    pub text: String,
    pub timestamp: i64,
    pub read_by: Vec<String>,
}

impl StoredMessage {
    /// Projection broadcast to a project room.
    #[must_use]
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            user: self.user.clone(),
            text: self.text.clone(),
            timestamp: self.timestamp,
            project_id: self.project_id.clone(),
        }
    }
}

/// Input for `MessageStore::create`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl NewMessage {
    /// Reject messages without a project or text.
    ///
    /// # Errors
    ///
    /// Returns `MessageError::Invalid` naming the missing field.
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.project_id.trim().is_empty() {
            return Err(MessageError::Invalid("projectId required"));
        }
        if self.text.trim().is_empty() {
            return Err(MessageError::Invalid("text required"));
        }
        Ok(())
    }

    fn into_stored(self) -> StoredMessage {
        StoredMessage {
            id: Uuid::new_v4(),
            project_id: self.project_id,
            user_id: self.user_id,
            user: self.username.unwrap_or_else(|| UNKNOWN_USER.to_owned()),
            text: self.text,
            timestamp: now_ms(),
            read_by: Vec::new(),
        }
    }
}

impl From<OutgoingMessage> for NewMessage {
    fn from(msg: OutgoingMessage) -> Self {
        Self { project_id: msg.project_id, text: msg.text, user_id: msg.user_id, username: msg.username }
    }
}

/// Partial update for `MessageStore::update`. Absent fields stay unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessageUpdate {
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageUpdate {
    /// # Errors
    ///
    /// Returns `MessageError::Invalid` when `text` is present but blank.
    pub fn validate(&self) -> Result<(), MessageError> {
        match &self.text {
            Some(text) if text.trim().is_empty() => Err(MessageError::Invalid("text must not be empty")),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, message: NewMessage) -> Result<StoredMessage, MessageError>;

    async fn get(&self, id: Uuid) -> Result<Option<StoredMessage>, MessageError>;

    /// Messages of one project, oldest first.
    async fn list_by_project(&self, project_id: &str) -> Result<Vec<StoredMessage>, MessageError>;

    /// Messages sent by `user_id`; `None` selects messages with no sender.
    async fn list_by_user(&self, user_id: Option<&str>) -> Result<Vec<StoredMessage>, MessageError>;

    async fn update(&self, id: Uuid, update: MessageUpdate) -> Result<Option<StoredMessage>, MessageError>;

    /// Add `user_id` to the read set. Idempotent.
    async fn mark_read(&self, id: Uuid, user_id: &str) -> Result<Option<StoredMessage>, MessageError>;

    /// Returns `false` if no message had that id.
    async fn delete(&self, id: Uuid) -> Result<bool, MessageError>;
}

// =============================================================================
// POSTGRES
// =============================================================================

type MessageRow = (Uuid, String, Option<String>, String, String, i64, Vec<String>);

const MESSAGE_COLUMNS: &str = "id, project_id, user_id, user_name, text, ts, read_by";

fn row_to_message((id, project_id, user_id, user, text, timestamp, read_by): MessageRow) -> StoredMessage {
    StoredMessage { id, project_id, user_id, user, text, timestamp, read_by }
}

pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create(&self, message: NewMessage) -> Result<StoredMessage, MessageError> {
        message.validate()?;
        let stored = message.into_stored();
        sqlx::query(
            "INSERT INTO messages (id, project_id, user_id, user_name, text, ts, read_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(stored.id)
        .bind(&stored.project_id)
        .bind(&stored.user_id)
        .bind(&stored.user)
        .bind(&stored.text)
        .bind(stored.timestamp)
        .bind(&stored.read_by)
        .execute(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredMessage>, MessageError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_message))
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<StoredMessage>, MessageError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE project_id = $1 ORDER BY ts ASC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_message).collect())
    }

    async fn list_by_user(&self, user_id: Option<&str>) -> Result<Vec<StoredMessage>, MessageError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE user_id IS NOT DISTINCT FROM $1 ORDER BY ts ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_message).collect())
    }

    async fn update(&self, id: Uuid, update: MessageUpdate) -> Result<Option<StoredMessage>, MessageError> {
        update.validate()?;
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "UPDATE messages SET text = COALESCE($2, text) WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id)
        .bind(update.text)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_message))
    }

    async fn mark_read(&self, id: Uuid, user_id: &str) -> Result<Option<StoredMessage>, MessageError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "UPDATE messages
             SET read_by = CASE WHEN $2 = ANY(read_by) THEN read_by ELSE array_append(read_by, $2) END
             WHERE id = $1
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_message))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, MessageError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

/// Process-local store. Insertion order doubles as timestamp order.
#[derive(Clone, Default)]
pub struct MemoryMessageStore {
    messages: Arc<RwLock<Vec<StoredMessage>>>,
}

impl MemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, message: NewMessage) -> Result<StoredMessage, MessageError> {
        message.validate()?;
        let stored = message.into_stored();
        self.messages.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredMessage>, MessageError> {
        Ok(self.messages.read().await.iter().find(|m| m.id == id).cloned())
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<StoredMessage>, MessageError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn list_by_user(&self, user_id: Option<&str>) -> Result<Vec<StoredMessage>, MessageError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| m.user_id.as_deref() == user_id)
            .cloned()
            .collect())
    }

    async fn update(&self, id: Uuid, update: MessageUpdate) -> Result<Option<StoredMessage>, MessageError> {
        update.validate()?;
        let mut messages = self.messages.write().await;
        let Some(message) = messages.iter_mut().find(|m| m.id == id) else {
            return Ok(None);
        };
        if let Some(text) = update.text {
            message.text = text;
        }
        Ok(Some(message.clone()))
    }

    async fn mark_read(&self, id: Uuid, user_id: &str) -> Result<Option<StoredMessage>, MessageError> {
        let mut messages = self.messages.write().await;
        let Some(message) = messages.iter_mut().find(|m| m.id == id) else {
            return Ok(None);
        };
        if !message.read_by.iter().any(|r| r == user_id) {
            message.read_by.push(user_id.to_owned());
        }
        Ok(Some(message.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, MessageError> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|m| m.id != id);
        Ok(messages.len() < before)
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
