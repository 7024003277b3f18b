//! Server dependencies for actions and effects (using traits for testability)
//!
//! This module provides the central dependency container used by the message
//! domain and the HTTP layer. Stores sit behind `Base*` traits so tests can
//! swap in the in-memory implementations from `test_dependencies`.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{ChatId, MessageCursor, MessageId, UserId};
use crate::domains::auth::JwtService;
use crate::domains::chats::{Chat, LastMessagePreview};
use crate::domains::messages::{Message, NewMessage};
use crate::kernel::{
    connection_hub::ConnectionHub, event_bus::EventProducer, BaseChatCache, BaseChatMembership,
    BaseMessageStore,
};

// =============================================================================
// Postgres Message Store (implements BaseMessageStore trait)
// =============================================================================

pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseMessageStore for PgMessageStore {
    async fn create(&self, message: NewMessage) -> Result<Message> {
        Message::create(message, &self.pool).await
    }

    async fn delete_many(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        ids: &[MessageId],
    ) -> Result<Vec<MessageId>> {
        Message::delete_many(chat_id, sender_id, ids, &self.pool).await
    }

    async fn update_text(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        id: &MessageId,
        text: &str,
    ) -> Result<u64> {
        Message::update_text(chat_id, sender_id, id, text, &self.pool).await
    }

    async fn list_before(
        &self,
        chat_id: ChatId,
        before: Option<&MessageCursor>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        Message::find_before(chat_id, before, limit, &self.pool).await
    }

    async fn latest_in_chat(&self, chat_id: ChatId) -> Result<Option<Message>> {
        Message::find_latest(chat_id, &self.pool).await
    }
}

// =============================================================================
// Postgres Chat Store (implements BaseChatMembership + BaseChatCache)
// =============================================================================

pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseChatMembership for PgChatStore {
    async fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        Chat::is_member(chat_id, user_id, &self.pool).await
    }

    async fn member_ids(&self, chat_id: ChatId) -> Result<Vec<UserId>> {
        Chat::member_ids(chat_id, &self.pool).await
    }
}

#[async_trait]
impl BaseChatCache for PgChatStore {
    async fn set_last_message(
        &self,
        chat_id: ChatId,
        preview: Option<LastMessagePreview>,
    ) -> Result<()> {
        Chat::set_last_message(chat_id, preview.as_ref(), &self.pool).await
    }

    async fn last_message(&self, chat_id: ChatId) -> Result<Option<LastMessagePreview>> {
        Ok(Chat::find_by_id(chat_id, &self.pool)
            .await?
            .and_then(|chat| chat.last_message()))
    }
}

// =============================================================================
// ServerDeps
// =============================================================================

/// Server dependencies accessible to actions and effects
#[derive(Clone)]
pub struct ServerDeps {
    pub messages: Arc<dyn BaseMessageStore>,
    pub membership: Arc<dyn BaseChatMembership>,
    pub chat_cache: Arc<dyn BaseChatCache>,
    /// Lifecycle event producer
    pub events: EventProducer,
    /// Live connections on this instance
    pub hub: ConnectionHub,
    /// JWT service for token verification
    pub jwt_service: Arc<JwtService>,
    /// Upper bound for detached publishes and fan-outs
    pub publish_timeout: Duration,
}

impl ServerDeps {
    /// Create new ServerDeps with the given dependencies
    pub fn new(
        messages: Arc<dyn BaseMessageStore>,
        membership: Arc<dyn BaseChatMembership>,
        chat_cache: Arc<dyn BaseChatCache>,
        events: EventProducer,
        hub: ConnectionHub,
        jwt_service: Arc<JwtService>,
    ) -> Self {
        Self {
            messages,
            membership,
            chat_cache,
            events,
            hub,
            jwt_service,
            publish_timeout: Duration::from_secs(5),
        }
    }

    /// Production wiring: Postgres for both stores.
    pub fn postgres(
        pool: PgPool,
        events: EventProducer,
        hub: ConnectionHub,
        jwt_service: Arc<JwtService>,
    ) -> Self {
        let chats = Arc::new(PgChatStore::new(pool.clone()));
        Self::new(
            Arc::new(PgMessageStore::new(pool)),
            chats.clone(),
            chats,
            events,
            hub,
            jwt_service,
        )
    }
}
