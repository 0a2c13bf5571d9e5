//! Conversation and message persistence

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};
use serde::Serialize;

use super::{DbPool, connection, now_timestamp, parse_datetime};
use crate::dialogue::{ChatMessage, Role};
use crate::{Error, Result};

/// A chat thread owned by one user
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub user_id: i64,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            created_at: parse_datetime(&row.get::<_, String>(3)?),
            updated_at: parse_datetime(&row.get::<_, String>(4)?),
        })
    }
}

const CONVERSATION_COLUMNS: &str = "id, user_id, title, created_at, updated_at";

/// A persisted chat turn
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    #[must_use]
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Conversation repository
#[derive(Clone)]
pub struct ConversationRepo {
    pool: DbPool,
}

impl ConversationRepo {
    /// Create a new conversation repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Start an untitled conversation
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self, user_id: i64) -> Result<i64> {
        let conn = connection(&self.pool)?;
        let now = now_timestamp();
        conn.execute(
            "INSERT INTO conversations (user_id, created_at, updated_at) VALUES (?1, ?2, ?2)",
            rusqlite::params![user_id, now],
        )?;

        let id = conn.last_insert_rowid();
        tracing::debug!(conversation_id = id, user_id, "conversation created");
        Ok(id)
    }

    /// Find a conversation only if `user_id` owns it
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_owned(&self, id: i64, user_id: i64) -> Result<Option<Conversation>> {
        let conn = connection(&self.pool)?;
        let conversation = conn
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1 AND user_id = ?2"
                ),
                [id, user_id],
                Conversation::from_row,
            )
            .optional()?;
        Ok(conversation)
    }

    /// The most recently active conversation of a user
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn latest(&self, user_id: i64) -> Result<Option<Conversation>> {
        let conn = connection(&self.pool)?;
        let conversation = conn
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE user_id = ?1 ORDER BY updated_at DESC, id DESC LIMIT 1"
                ),
                [user_id],
                Conversation::from_row,
            )
            .optional()?;
        Ok(conversation)
    }

    /// All conversations of a user, most recently active first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, user_id: i64) -> Result<Vec<Conversation>> {
        let conn = connection(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE user_id = ?1 ORDER BY updated_at DESC, id DESC"
        ))?;

        let conversations = stmt
            .query_map([user_id], Conversation::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conversations)
    }

    /// Delete a conversation and its messages
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, id: i64) -> Result<bool> {
        let conn = connection(&self.pool)?;
        Ok(conn.execute("DELETE FROM conversations WHERE id = ?1", [id])? > 0)
    }

    /// Delete every conversation of a user
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete_all(&self, user_id: i64) -> Result<usize> {
        let conn = connection(&self.pool)?;
        let deleted = conn.execute("DELETE FROM conversations WHERE user_id = ?1", [user_id])?;
        tracing::info!(user_id, deleted, "conversations deleted");
        Ok(deleted)
    }

    /// Messages of a conversation in chronological order
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn messages(&self, id: i64) -> Result<Vec<StoredMessage>> {
        let conn = connection(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, created_at FROM messages
             WHERE conversation_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;

        let messages = stmt
            .query_map([id], |row| {
                let role: String = row.get(2)?;
                Ok(StoredMessage {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    role: Role::parse(&role).unwrap_or(Role::User),
                    content: row.get(3)?,
                    created_at: parse_datetime(&row.get::<_, String>(4)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// Append a message
    ///
    /// # Errors
    ///
    /// Returns error for system messages or if the conversation is missing
    pub fn add_message(&self, id: i64, role: Role, content: &str) -> Result<i64> {
        if role == Role::System {
            return Err(Error::BadRequest(
                "system messages are not stored".to_string(),
            ));
        }

        let conn = connection(&self.pool)?;
        conn.execute(
            "INSERT INTO messages (conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, role.as_str(), content, now_timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Delete all messages and reset the title
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn clear_messages(&self, id: i64) -> Result<usize> {
        let mut conn = connection(&self.pool)?;
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM messages WHERE conversation_id = ?1", [id])?;
        tx.execute(
            "UPDATE conversations SET title = NULL, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now_timestamp(), id],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn title(&self, id: i64) -> Result<Option<String>> {
        let conn = connection(&self.pool)?;
        let title: Option<Option<String>> = conn
            .query_row("SELECT title FROM conversations WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(title.flatten())
    }

    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set_title(&self, id: i64, title: &str) -> Result<()> {
        let conn = connection(&self.pool)?;
        conn.execute(
            "UPDATE conversations SET title = ?1 WHERE id = ?2",
            rusqlite::params![title, id],
        )?;
        Ok(())
    }

    /// Mark a conversation as just active
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn touch(&self, id: i64) -> Result<()> {
        let conn = connection(&self.pool)?;
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now_timestamp(), id],
        )?;
        Ok(())
    }

    /// The first thing the user said in a conversation
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn first_user_message(&self, id: i64) -> Result<Option<String>> {
        let conn = connection(&self.pool)?;
        let content = conn
            .query_row(
                "SELECT content FROM messages WHERE conversation_id = ?1 AND role = 'user'
                 ORDER BY created_at ASC, id ASC LIMIT 1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content)
    }
}
