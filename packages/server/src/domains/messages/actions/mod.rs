//! Message actions - membership-checked message lifecycle operations
//!
//! Every action validates its input, then checks membership, before touching
//! the message store. Mutations publish their lifecycle event detached from
//! the caller once the store write has succeeded.

mod delete_message;
mod edit_message;
mod get_messages;
mod send_message;

pub use delete_message::delete_message;
pub use edit_message::edit_message;
pub use get_messages::get_messages;
pub use send_message::send_message;

use crate::common::{ChatId, UserId};
use crate::domains::messages::MessageError;
use crate::kernel::ServerDeps;

/// Reject non-positive relational ids.
fn validate_ids(chat_id: ChatId, user_id: UserId) -> Result<(), MessageError> {
    if chat_id <= 0 {
        return Err(MessageError::invalid("chat_id must be positive"));
    }
    if user_id <= 0 {
        return Err(MessageError::invalid("user_id must be positive"));
    }
    Ok(())
}

/// Fail with `UserNotMemberOfChat` unless `user_id` belongs to `chat_id`.
async fn require_membership(
    chat_id: ChatId,
    user_id: UserId,
    deps: &ServerDeps,
) -> Result<(), MessageError> {
    let is_member = deps
        .membership
        .is_member(chat_id, user_id)
        .await
        .map_err(MessageError::database("failed to check chat membership"))?;

    if !is_member {
        return Err(MessageError::UserNotMemberOfChat);
    }
    Ok(())
}
