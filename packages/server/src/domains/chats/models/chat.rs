use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::{ChatId, UserId};

/// Chat - relational aggregate with a denormalized last-message preview.
///
/// `last_message_text` / `last_message_at` are a projection of the message
/// store's latest message. Only the reconciliation consumer writes them.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Chat {
    pub id: ChatId,
    pub title: String,
    pub is_private: bool,
    pub member_ids: Vec<UserId>,
    pub last_message_text: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Preview of the latest message shown in chat lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessagePreview {
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Chat {
    /// Current preview, if the chat has any message.
    pub fn last_message(&self) -> Option<LastMessagePreview> {
        match (&self.last_message_text, self.last_message_at) {
            (Some(text), Some(at)) => Some(LastMessagePreview {
                text: text.clone(),
                at,
            }),
            _ => None,
        }
    }
}

// =============================================================================
// Chat Queries
// =============================================================================

const SELECT_CHAT: &str = r#"
    SELECT
        c.id, c.title, c.is_private, c.last_message_text, c.last_message_at,
        COALESCE(
            array_agg(m.user_id ORDER BY m.user_id) FILTER (WHERE m.user_id IS NOT NULL),
            '{}'
        ) AS member_ids
    FROM chats c
    LEFT JOIN chat_members m ON m.chat_id = c.id
"#;

impl Chat {
    /// Find chat by ID, including its members
    pub async fn find_by_id(id: ChatId, pool: &PgPool) -> Result<Option<Self>> {
        let chat = sqlx::query_as::<_, Chat>(&format!(
            "{} WHERE c.id = $1 GROUP BY c.id",
            SELECT_CHAT
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(chat)
    }

    /// Create a chat with its initial members.
    ///
    /// Chat CRUD belongs to the chat management service; this exists for
    /// fixtures and local seeding.
    pub async fn create(
        title: String,
        is_private: bool,
        member_ids: &[UserId],
        pool: &PgPool,
    ) -> Result<Self> {
        let mut tx = pool.begin().await?;

        let id: ChatId = sqlx::query_scalar(
            r#"
            INSERT INTO chats (title, is_private)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(&title)
        .bind(is_private)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO chat_members (chat_id, user_id)
            SELECT $1, UNNEST($2::BIGINT[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(member_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Self {
            id,
            title,
            is_private,
            member_ids: member_ids.to_vec(),
            last_message_text: None,
            last_message_at: None,
        })
    }

    /// Check whether a user belongs to a chat
    pub async fn is_member(id: ChatId, user_id: UserId, pool: &PgPool) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM chat_members WHERE chat_id = $1 AND user_id = $2)",
        )
        .bind(id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;
        Ok(exists)
    }

    /// List the members of a chat
    pub async fn member_ids(id: ChatId, pool: &PgPool) -> Result<Vec<UserId>> {
        let members = sqlx::query_scalar::<_, UserId>(
            "SELECT user_id FROM chat_members WHERE chat_id = $1 ORDER BY user_id",
        )
        .bind(id)
        .fetch_all(pool)
        .await?;
        Ok(members)
    }

    /// Overwrite the last-message preview. `None` clears it (chat emptied).
    pub async fn set_last_message(
        id: ChatId,
        preview: Option<&LastMessagePreview>,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE chats
            SET last_message_text = $2, last_message_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(preview.map(|p| p.text.as_str()))
        .bind(preview.map(|p| p.at))
        .execute(pool)
        .await?;
        Ok(())
    }
}
