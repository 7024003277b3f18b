use tracing::info;

use super::{require_membership, validate_ids};
use crate::common::{ChatId, UserId};
use crate::domains::messages::events::{MessageCreated, MessageEvent};
use crate::domains::messages::{Message, MessageError, NewMessage};
use crate::kernel::ServerDeps;

// ============================================================================
// Action: Send Message
// ============================================================================

/// Persist a new message from a chat member and announce it on the event bus.
///
/// Returns the stored message (with its store-assigned id and timestamp) for
/// the delivery layer to fan out. A failed publish never fails the send.
pub async fn send_message(
    chat_id: ChatId,
    user_id: UserId,
    username: String,
    text: String,
    deps: &ServerDeps,
) -> Result<Message, MessageError> {
    validate_ids(chat_id, user_id)?;
    if text.trim().is_empty() {
        return Err(MessageError::invalid("text must not be empty"));
    }

    require_membership(chat_id, user_id, deps).await?;

    let message = deps
        .messages
        .create(NewMessage {
            chat_id,
            sender_id: user_id,
            sender_username: username,
            text,
        })
        .await
        .map_err(MessageError::database("failed to create message"))?;

    info!(chat_id = %chat_id, message_id = %message.id, sender_id = %user_id, "Message created");

    deps.events.publish_detached(
        MessageEvent::Created(MessageCreated {
            message_id: message.id.clone(),
            chat_id,
            sender_id: user_id,
            text: message.text.clone(),
            created_at: message.created_at,
        }),
        deps.publish_timeout,
    );

    Ok(message)
}
