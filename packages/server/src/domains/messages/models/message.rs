use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::{ChatId, MessageCursor, MessageId, UserId};

/// Message - a chat message owned by the message store.
///
/// Immutable except `text` (edit) and existence (delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A message about to be persisted; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub text: String,
}

// =============================================================================
// Message Queries
// =============================================================================

impl Message {
    /// Insert a message. Ids are time-ordered UUIDv7 strings.
    pub async fn create(new: NewMessage, pool: &PgPool) -> Result<Self> {
        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (id, chat_id, sender_id, sender_username, text)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(new.chat_id)
        .bind(new.sender_id)
        .bind(new.sender_username)
        .bind(new.text)
        .fetch_one(pool)
        .await?;
        Ok(message)
    }

    /// Delete the sender's messages with the given ids; returns the removed ids.
    pub async fn delete_many(
        chat_id: ChatId,
        sender_id: UserId,
        ids: &[MessageId],
        pool: &PgPool,
    ) -> Result<Vec<MessageId>> {
        let ids: Vec<&str> = ids.iter().map(MessageId::as_str).collect();
        let removed = sqlx::query_scalar::<_, MessageId>(
            r#"
            DELETE FROM messages
            WHERE chat_id = $1 AND sender_id = $2 AND id = ANY($3)
            RETURNING id
            "#,
        )
        .bind(chat_id)
        .bind(sender_id)
        .bind(&ids)
        .fetch_all(pool)
        .await?;
        Ok(removed)
    }

    /// Replace the text of one of the sender's messages; returns rows affected.
    pub async fn update_text(
        chat_id: ChatId,
        sender_id: UserId,
        id: &MessageId,
        text: &str,
        pool: &PgPool,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET text = $4
            WHERE chat_id = $1 AND sender_id = $2 AND id = $3
            "#,
        )
        .bind(chat_id)
        .bind(sender_id)
        .bind(id.as_str())
        .bind(text)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Messages strictly older than `before`, newest first.
    pub async fn find_before(
        chat_id: ChatId,
        before: Option<&MessageCursor>,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let messages = match before {
            Some(cursor) => {
                sqlx::query_as::<_, Message>(
                    r#"
                    SELECT * FROM messages
                    WHERE chat_id = $1 AND (created_at, id) < ($2, $3)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $4
                    "#,
                )
                .bind(chat_id)
                .bind(cursor.created_at)
                .bind(cursor.message_id.as_str())
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Message>(
                    r#"
                    SELECT * FROM messages
                    WHERE chat_id = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#,
                )
                .bind(chat_id)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
        };
        Ok(messages)
    }

    /// The chat's true latest message, if any.
    pub async fn find_latest(chat_id: ChatId, pool: &PgPool) -> Result<Option<Self>> {
        let message = sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE chat_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(chat_id)
        .fetch_optional(pool)
        .await?;
        Ok(message)
    }
}
