//! Message REST endpoints.
//!
//! POST   /api/chats/:chat_id/messages               send
//! PUT    /api/chats/:chat_id/messages/:message_id   edit
//! DELETE /api/chats/:chat_id/messages               delete a batch
//! GET    /api/chats/:chat_id/messages               page through history
//!
//! Successful mutations are fanned out to online members in the background.

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::pagination::clamp_limit;
use crate::common::{ChatId, MessageCursor, MessageId};
use crate::domains::messages::actions;
use crate::domains::messages::effects::{fan_out_detached, ChatFrame, DeletedMessages, EditedMessage};
use crate::domains::messages::Message;
use crate::server::app::AxumAppState;
use crate::server::error::ApiError;
use crate::server::middleware::AuthUser;

/// Page size when the client sends no `limit`.
const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Deserialize)]
pub struct MessageTextRequest {
    pub text: String,
}

#[derive(Deserialize)]
pub struct DeleteMessagesRequest {
    pub message_ids: Vec<MessageId>,
}

#[derive(Serialize, Deserialize)]
pub struct DeleteMessagesResponse {
    pub deleted: u64,
}

#[derive(Deserialize)]
pub struct ListMessagesQuery {
    pub limit: Option<i64>,
    pub before_time: Option<DateTime<Utc>>,
    pub before_id: Option<String>,
    /// Opaque cursor from a previous page's `next_cursor`
    pub cursor: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
}

pub async fn send_message_handler(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path(chat_id): Path<ChatId>,
    Json(body): Json<MessageTextRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let deps = state.server_deps.as_ref();
    let message =
        actions::send_message(chat_id, user.user_id, user.username, body.text, deps).await?;

    fan_out_detached(deps, chat_id, ChatFrame::NewMessage(message.clone()));

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn edit_message_handler(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path((chat_id, message_id)): Path<(ChatId, String)>,
    Json(body): Json<MessageTextRequest>,
) -> Result<StatusCode, ApiError> {
    let deps = state.server_deps.as_ref();
    let message_id = MessageId::new(message_id);
    actions::edit_message(
        user.user_id,
        chat_id,
        message_id.clone(),
        body.text.clone(),
        deps,
    )
    .await?;

    fan_out_detached(
        deps,
        chat_id,
        ChatFrame::EditMessage(EditedMessage {
            message_id,
            chat_id,
            text: body.text,
        }),
    );

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_messages_handler(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path(chat_id): Path<ChatId>,
    Json(body): Json<DeleteMessagesRequest>,
) -> Result<Json<DeleteMessagesResponse>, ApiError> {
    let deps = state.server_deps.as_ref();
    let removed = actions::delete_message(user.user_id, chat_id, body.message_ids, deps).await?;
    let deleted = removed.len() as u64;

    fan_out_detached(
        deps,
        chat_id,
        ChatFrame::DeleteMessage(DeletedMessages {
            message_ids: removed,
            chat_id,
        }),
    );

    Ok(Json(DeleteMessagesResponse { deleted }))
}

pub async fn list_messages_handler(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    let before = match query.cursor {
        Some(cursor) => Some(
            MessageCursor::decode(&cursor).map_err(|e| ApiError::BadRequest(e.to_string()))?,
        ),
        None => MessageCursor::from_parts(query.before_time, query.before_id)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
    };
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);

    let messages =
        actions::get_messages(user.user_id, chat_id, before, limit, state.server_deps.as_ref())
            .await?;

    // A short page is the last one.
    let next_cursor = if messages.len() as i64 >= clamp_limit(limit) {
        messages
            .last()
            .map(|oldest| MessageCursor::from_message(oldest).encode())
    } else {
        None
    };

    Ok(Json(MessagePage {
        messages,
        next_cursor,
    }))
}
