use tracing::info;

use super::{require_membership, validate_ids};
use crate::common::{ChatId, MessageId, UserId};
use crate::domains::messages::events::{MessageEdited, MessageEvent};
use crate::domains::messages::MessageError;
use crate::kernel::ServerDeps;

// ============================================================================
// Action: Edit Message
// ============================================================================

/// Replace the text of one of the sender's messages.
///
/// `MessageDoesNotExist` when nothing matched: unknown id, another chat, or
/// another author's message.
pub async fn edit_message(
    sender_id: UserId,
    chat_id: ChatId,
    message_id: MessageId,
    new_text: String,
    deps: &ServerDeps,
) -> Result<(), MessageError> {
    validate_ids(chat_id, sender_id)?;
    if message_id.is_blank() {
        return Err(MessageError::invalid("message_id must not be empty"));
    }
    if new_text.trim().is_empty() {
        return Err(MessageError::invalid("text must not be empty"));
    }

    require_membership(chat_id, sender_id, deps).await?;

    let updated = deps
        .messages
        .update_text(chat_id, sender_id, &message_id, &new_text)
        .await
        .map_err(MessageError::database("failed to update message"))?;

    if updated == 0 {
        return Err(MessageError::MessageDoesNotExist);
    }

    info!(chat_id = %chat_id, message_id = %message_id, "Message edited");

    deps.events.publish_detached(
        MessageEvent::Edited(MessageEdited {
            message_id,
            chat_id,
        }),
        deps.publish_timeout,
    );

    Ok(())
}
