use tracing::debug;

use super::{require_membership, validate_ids};
use crate::common::pagination::clamp_limit;
use crate::common::{ChatId, MessageCursor, UserId};
use crate::domains::messages::{Message, MessageError};
use crate::kernel::ServerDeps;

// ============================================================================
// Action: Get Messages
// ============================================================================

/// One page of chat history, newest first.
///
/// Returns messages strictly older than `before` (or the newest messages when
/// `before` is `None`), ordered by `(created_at, id)` descending. `limit` must
/// be positive and is capped at `MAX_PAGE_SIZE`.
pub async fn get_messages(
    user_id: UserId,
    chat_id: ChatId,
    before: Option<MessageCursor>,
    limit: i64,
    deps: &ServerDeps,
) -> Result<Vec<Message>, MessageError> {
    validate_ids(chat_id, user_id)?;
    if limit <= 0 {
        return Err(MessageError::invalid("limit must be positive"));
    }

    require_membership(chat_id, user_id, deps).await?;

    let limit = clamp_limit(limit);
    let messages = deps
        .messages
        .list_before(chat_id, before.as_ref(), limit)
        .await
        .map_err(MessageError::database("failed to list messages"))?;

    debug!(chat_id = %chat_id, count = messages.len(), limit, "Listed messages");
    Ok(messages)
}
