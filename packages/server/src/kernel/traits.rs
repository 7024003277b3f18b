// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Membership rules, validation and event emission live in domain actions that use these traits.
//
// Naming convention: Base* for trait names (e.g., BaseMessageStore, BaseChatCache)

use anyhow::Result;
use async_trait::async_trait;

use crate::common::{ChatId, MessageCursor, MessageId, UserId};
use crate::domains::chats::LastMessagePreview;
use crate::domains::messages::{Message, NewMessage};

// =============================================================================
// Message Store Trait (Infrastructure - authoritative message content)
// =============================================================================

#[async_trait]
pub trait BaseMessageStore: Send + Sync {
    /// Persist a message; the store assigns id and created_at
    async fn create(&self, message: NewMessage) -> Result<Message>;

    /// Delete the sender's messages among `ids`; returns the ids actually removed
    async fn delete_many(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        ids: &[MessageId],
    ) -> Result<Vec<MessageId>>;

    /// Replace the text of one of the sender's messages; returns rows affected
    async fn update_text(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        id: &MessageId,
        text: &str,
    ) -> Result<u64>;

    /// Messages strictly older than `before`, ordered by (created_at, id) descending
    async fn list_before(
        &self,
        chat_id: ChatId,
        before: Option<&MessageCursor>,
        limit: i64,
    ) -> Result<Vec<Message>>;

    /// The chat's true latest message
    async fn latest_in_chat(&self, chat_id: ChatId) -> Result<Option<Message>>;
}

// =============================================================================
// Chat Membership Trait (Infrastructure - membership gate)
// =============================================================================

#[async_trait]
pub trait BaseChatMembership: Send + Sync {
    /// Is `user_id` currently a member of `chat_id`
    async fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool>;

    /// All current members of a chat
    async fn member_ids(&self, chat_id: ChatId) -> Result<Vec<UserId>>;
}

// =============================================================================
// Chat Metadata Cache Trait (Infrastructure - denormalized preview)
// =============================================================================

#[async_trait]
pub trait BaseChatCache: Send + Sync {
    /// Overwrite the chat's last-message preview (`None` clears it)
    async fn set_last_message(
        &self,
        chat_id: ChatId,
        preview: Option<LastMessagePreview>,
    ) -> Result<()>;

    /// Current preview, if the chat exists and has one
    async fn last_message(&self, chat_id: ChatId) -> Result<Option<LastMessagePreview>>;
}
