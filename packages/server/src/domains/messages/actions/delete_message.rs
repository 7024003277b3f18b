use tracing::info;

use super::{require_membership, validate_ids};
use crate::common::{ChatId, MessageId, UserId};
use crate::domains::messages::events::{MessageEvent, MessagesDeleted};
use crate::domains::messages::MessageError;
use crate::kernel::ServerDeps;

// ============================================================================
// Action: Delete Messages
// ============================================================================

/// Delete a batch of the sender's messages in a chat.
///
/// Returns the ids actually deleted. Ids that do not exist (or belong to
/// someone else) are skipped and never announced; only a batch that deletes
/// nothing is an error.
pub async fn delete_message(
    sender_id: UserId,
    chat_id: ChatId,
    message_ids: Vec<MessageId>,
    deps: &ServerDeps,
) -> Result<Vec<MessageId>, MessageError> {
    validate_ids(chat_id, sender_id)?;
    if message_ids.is_empty() {
        return Err(MessageError::invalid("message_ids must not be empty"));
    }
    if message_ids.iter().any(MessageId::is_blank) {
        return Err(MessageError::invalid("message_ids must not contain empty ids"));
    }

    require_membership(chat_id, sender_id, deps).await?;

    let deleted = deps
        .messages
        .delete_many(chat_id, sender_id, &message_ids)
        .await
        .map_err(MessageError::database("failed to delete messages"))?;

    if deleted.is_empty() {
        return Err(MessageError::MessageDoesNotExist);
    }

    info!(
        chat_id = %chat_id,
        requested = message_ids.len(),
        deleted = deleted.len(),
        "Messages deleted"
    );

    deps.events.publish_detached(
        MessageEvent::Deleted(MessagesDeleted {
            message_ids: deleted.clone(),
            chat_id,
        }),
        deps.publish_timeout,
    );

    Ok(deleted)
}
