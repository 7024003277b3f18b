//! Keeps the chat's last-message preview consistent with the message store.
//!
//! Every lifecycle event triggers the same read-repair: read the chat's true
//! latest message and overwrite the preview. Event payloads are never applied,
//! so duplicates and reordering converge to the same state.
//!
//! Consumers for different topics run concurrently, so a reconcile can read
//! the truth, stall, and write after a newer reconcile. Each write is therefore
//! followed by a re-read; if the truth moved, the write is repeated.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::common::ChatId;
use crate::domains::chats::LastMessagePreview;
use crate::domains::messages::events::MessageEvent;
use crate::kernel::event_bus::{EventHandler, HandlerError};
use crate::kernel::{BaseChatCache, BaseMessageStore, ServerDeps};

/// Write-then-verify rounds before giving up and asking for redelivery.
const MAX_RECONCILE_ROUNDS: usize = 5;

async fn current_preview(
    chat_id: ChatId,
    messages: &dyn BaseMessageStore,
) -> Result<Option<LastMessagePreview>> {
    Ok(messages
        .latest_in_chat(chat_id)
        .await?
        .map(|latest| LastMessagePreview {
            text: latest.text,
            at: latest.created_at,
        }))
}

/// Overwrite the chat's preview with the store's current latest message.
///
/// Returns once the written preview still matches the store after the write.
pub async fn reconcile_last_message(
    chat_id: ChatId,
    messages: &dyn BaseMessageStore,
    cache: &dyn BaseChatCache,
) -> Result<Option<LastMessagePreview>> {
    let mut preview = current_preview(chat_id, messages).await?;

    for round in 1..=MAX_RECONCILE_ROUNDS {
        cache.set_last_message(chat_id, preview.clone()).await?;

        let after = current_preview(chat_id, messages).await?;
        if after == preview {
            debug!(chat_id = %chat_id, round, has_preview = preview.is_some(), "Reconciled last message");
            return Ok(preview);
        }
        preview = after;
    }

    bail!(
        "chat {} kept changing across {} reconcile rounds",
        chat_id,
        MAX_RECONCILE_ROUNDS
    )
}

/// Event handler that runs `reconcile_last_message` for each lifecycle event.
pub struct LastMessageReconciler {
    messages: Arc<dyn BaseMessageStore>,
    cache: Arc<dyn BaseChatCache>,
}

impl LastMessageReconciler {
    pub fn new(messages: Arc<dyn BaseMessageStore>, cache: Arc<dyn BaseChatCache>) -> Self {
        Self { messages, cache }
    }

    pub fn from_deps(deps: &ServerDeps) -> Self {
        Self::new(deps.messages.clone(), deps.chat_cache.clone())
    }
}

#[async_trait]
impl EventHandler for LastMessageReconciler {
    async fn handle(&self, subject: &str, payload: &[u8]) -> Result<(), HandlerError> {
        let event = MessageEvent::decode(subject, payload).map_err(HandlerError::Discard)?;

        reconcile_last_message(event.chat_id(), self.messages.as_ref(), self.cache.as_ref())
            .await
            .map(|_| ())
            .map_err(HandlerError::Retry)
    }
}
