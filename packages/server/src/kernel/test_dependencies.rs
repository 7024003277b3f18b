// TestDependencies - in-memory implementations for testing
//
// Provides stores that can be injected into ServerDeps for tests, plus a
// recording NATS publisher. Every store counts its calls so tests can assert
// that validation and membership failures never reach the store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    connection_hub::ConnectionHub, event_bus::EventProducer, nats::TestNats, BaseChatCache,
    BaseChatMembership, BaseMessageStore, ServerDeps,
};
use crate::common::pagination::compare_desc_key;
use crate::common::{ChatId, MessageCursor, MessageId, UserId};
use crate::domains::auth::JwtService;
use crate::domains::chats::LastMessagePreview;
use crate::domains::messages::{Message, NewMessage};

pub const TEST_JWT_SECRET: &str = "test_secret_key";
pub const TEST_JWT_ISSUER: &str = "test_issuer";

// =============================================================================
// In-memory Message Store
// =============================================================================

/// Message store backed by a Vec. Ids are "m1", "m2", ... and timestamps
/// advance one second per created message from a fixed epoch.
pub struct InMemoryMessageStore {
    messages: Mutex<Vec<Message>>,
    next_id: AtomicU64,
    clock: Mutex<DateTime<Utc>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            clock: Mutex::new(Utc.timestamp_opt(1_704_067_200, 0).single().unwrap_or_default()),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails, as if the database were down.
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Insert a message as-is (explicit id and timestamp).
    pub fn seed(&self, message: Message) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
    }

    /// Every stored message of a chat, newest first.
    pub fn messages_in(&self, chat_id: ChatId) -> Vec<Message> {
        let mut found: Vec<Message> = self
            .messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        sort_newest_first(&mut found);
        found
    }

    pub fn get(&self, id: &str) -> Option<Message> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|m| m.id.as_str() == id)
            .cloned()
    }

    /// Number of trait calls made against this store.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("message store unavailable");
        }
        Ok(())
    }

    fn tick(&self) -> DateTime<Utc> {
        let mut clock = self.clock.lock().unwrap_or_else(|e| e.into_inner());
        *clock += ChronoDuration::seconds(1);
        *clock
    }
}

fn sort_newest_first(messages: &mut [Message]) {
    messages.sort_by(|a, b| {
        compare_desc_key((&b.created_at, &b.id), (&a.created_at, &a.id))
    });
}

#[async_trait]
impl BaseMessageStore for InMemoryMessageStore {
    async fn create(&self, message: NewMessage) -> Result<Message> {
        self.enter()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = Message {
            id: MessageId::new(format!("m{}", id)),
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            sender_username: message.sender_username,
            text: message.text,
            created_at: self.tick(),
        };
        self.seed(stored.clone());
        Ok(stored)
    }

    async fn delete_many(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        ids: &[MessageId],
    ) -> Result<Vec<MessageId>> {
        self.enter()?;
        let targets: HashSet<&MessageId> = ids.iter().collect();
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let mut removed = Vec::new();
        messages.retain(|m| {
            let hit = m.chat_id == chat_id && m.sender_id == sender_id && targets.contains(&m.id);
            if hit {
                removed.push(m.id.clone());
            }
            !hit
        });
        Ok(removed)
    }

    async fn update_text(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        id: &MessageId,
        text: &str,
    ) -> Result<u64> {
        self.enter()?;
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let mut updated = 0;
        for message in messages
            .iter_mut()
            .filter(|m| m.chat_id == chat_id && m.sender_id == sender_id && &m.id == id)
        {
            message.text = text.to_string();
            updated += 1;
        }
        Ok(updated)
    }

    async fn list_before(
        &self,
        chat_id: ChatId,
        before: Option<&MessageCursor>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        self.enter()?;
        let mut page: Vec<Message> = self
            .messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .filter(|m| before.map_or(true, |c| c.admits(&m.created_at, &m.id)))
            .cloned()
            .collect();
        sort_newest_first(&mut page);
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }

    async fn latest_in_chat(&self, chat_id: ChatId) -> Result<Option<Message>> {
        self.enter()?;
        Ok(self.messages_in(chat_id).into_iter().next())
    }
}

// =============================================================================
// In-memory Chat Store (membership + last-message cache)
// =============================================================================

#[derive(Default)]
pub struct InMemoryChatStore {
    members: Mutex<HashMap<ChatId, Vec<UserId>>>,
    previews: Mutex<HashMap<ChatId, LastMessagePreview>>,
    preview_writes: AtomicUsize,
    membership_failing: AtomicBool,
    cache_failing: AtomicBool,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a chat with its members.
    pub fn with_chat(self, chat_id: ChatId, members: &[UserId]) -> Self {
        self.add_chat(chat_id, members);
        self
    }

    pub fn add_chat(&self, chat_id: ChatId, members: &[UserId]) {
        self.members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chat_id, members.to_vec());
    }

    pub fn remove_member(&self, chat_id: ChatId, user_id: UserId) {
        if let Some(members) = self
            .members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&chat_id)
        {
            members.retain(|m| *m != user_id);
        }
    }

    pub fn set_membership_failing(&self, failing: bool) {
        self.membership_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_cache_failing(&self, failing: bool) {
        self.cache_failing.store(failing, Ordering::SeqCst);
    }

    /// Current preview, read synchronously.
    pub fn preview(&self, chat_id: ChatId) -> Option<LastMessagePreview> {
        self.previews
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&chat_id)
            .cloned()
    }

    /// How many times the preview was written.
    pub fn preview_writes(&self) -> usize {
        self.preview_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseChatMembership for InMemoryChatStore {
    async fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        if self.membership_failing.load(Ordering::SeqCst) {
            anyhow::bail!("membership lookup unavailable");
        }
        Ok(self
            .members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&chat_id)
            .is_some_and(|members| members.contains(&user_id)))
    }

    async fn member_ids(&self, chat_id: ChatId) -> Result<Vec<UserId>> {
        if self.membership_failing.load(Ordering::SeqCst) {
            anyhow::bail!("membership lookup unavailable");
        }
        Ok(self
            .members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl BaseChatCache for InMemoryChatStore {
    async fn set_last_message(
        &self,
        chat_id: ChatId,
        preview: Option<LastMessagePreview>,
    ) -> Result<()> {
        if self.cache_failing.load(Ordering::SeqCst) {
            anyhow::bail!("chat cache unavailable");
        }
        self.preview_writes.fetch_add(1, Ordering::SeqCst);
        let mut previews = self.previews.lock().unwrap_or_else(|e| e.into_inner());
        match preview {
            Some(preview) => previews.insert(chat_id, preview),
            None => previews.remove(&chat_id),
        };
        Ok(())
    }

    async fn last_message(&self, chat_id: ChatId) -> Result<Option<LastMessagePreview>> {
        Ok(self.preview(chat_id))
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Bundle of in-memory dependencies with handles kept for assertions.
pub struct TestDependencies {
    pub messages: Arc<InMemoryMessageStore>,
    pub chats: Arc<InMemoryChatStore>,
    pub nats: Arc<TestNats>,
    pub hub: ConnectionHub,
    pub jwt_service: Arc<JwtService>,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(InMemoryMessageStore::new()),
            chats: Arc::new(InMemoryChatStore::new()),
            nats: Arc::new(TestNats::new()),
            hub: ConnectionHub::new(),
            jwt_service: Arc::new(JwtService::new(
                TEST_JWT_SECRET,
                TEST_JWT_ISSUER.to_string(),
            )),
        }
    }

    /// Builder: add a chat with its members.
    pub fn with_chat(self, chat_id: ChatId, members: &[UserId]) -> Self {
        self.chats.add_chat(chat_id, members);
        self
    }

    /// Builder: replace the message store.
    pub fn with_message_store(mut self, store: InMemoryMessageStore) -> Self {
        self.messages = Arc::new(store);
        self
    }

    /// Builder: replace the NATS publisher.
    pub fn with_nats(mut self, nats: TestNats) -> Self {
        self.nats = Arc::new(nats);
        self
    }

    /// ServerDeps sharing these stores, for use in actions and routes.
    pub fn server_deps(&self) -> ServerDeps {
        ServerDeps::new(
            self.messages.clone(),
            self.chats.clone(),
            self.chats.clone(),
            EventProducer::new(self.nats.clone()),
            self.hub.clone(),
            self.jwt_service.clone(),
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message(chat_id: ChatId, text: &str) -> NewMessage {
        NewMessage {
            chat_id,
            sender_id: 1,
            sender_username: "alice".to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_ids_and_timestamps_increase() {
        let store = InMemoryMessageStore::new();

        let first = store.create(new_message(1, "a")).await.unwrap();
        let second = store.create(new_message(1, "b")).await.unwrap();

        assert_eq!(first.id.as_str(), "m1");
        assert_eq!(second.id.as_str(), "m2");
        assert!(second.created_at > first.created_at);
        assert_eq!(
            store.latest_in_chat(1).await.unwrap().map(|m| m.text),
            Some("b".to_string())
        );
    }

    #[tokio::test]
    async fn test_delete_is_scoped_to_sender_and_chat() {
        let store = InMemoryMessageStore::new();
        let mine = store.create(new_message(1, "a")).await.unwrap();
        let other_chat = store.create(new_message(2, "b")).await.unwrap();

        let deleted = store
            .delete_many(1, 1, &[mine.id.clone(), other_chat.id.clone()])
            .await
            .unwrap();

        assert_eq!(deleted, vec![mine.id]);
        assert!(store.get("m2").is_some());
        assert!(store.delete_many(1, 2, &[other_chat.id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_store_preview_clears_on_none() {
        let chats = InMemoryChatStore::new().with_chat(1, &[1, 2]);
        let preview = LastMessagePreview {
            text: "hi".to_string(),
            at: Utc::now(),
        };

        chats.set_last_message(1, Some(preview.clone())).await.unwrap();
        assert_eq!(chats.preview(1), Some(preview));

        chats.set_last_message(1, None).await.unwrap();
        assert_eq!(chats.preview(1), None);
        assert_eq!(chats.preview_writes(), 2);
    }
}
