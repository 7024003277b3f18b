//! WebSocket endpoint.
//!
//! GET /ws?token=JWT
//!
//! Browsers can't set headers on a WebSocket handshake, so the token comes as a
//! query param (Authorization header also accepted). It is verified before the
//! upgrade; an invalid token gets a 401 and no socket.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Extension, Query,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;
use tracing::info;

use crate::common::UserId;
use crate::kernel::{run_connection, WsFrame};
use crate::server::app::AxumAppState;
use crate::server::error::ApiError;
use crate::server::middleware::extract_bearer_token;

#[derive(Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    token: Option<String>,
}

pub async fn ws_handler(
    Extension(state): Extension<AxumAppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .or_else(|| extract_bearer_token(&headers))
        .ok_or(ApiError::Unauthorized)?;

    let claims = state
        .server_deps
        .jwt_service
        .verify_token(&token)
        .map_err(|_| ApiError::Unauthorized)?;

    // Token is checked before the handshake itself
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let user_id = claims.user_id;
    Ok(ws.on_upgrade(move |socket| handle_socket(state, user_id, socket)))
}

async fn handle_socket(state: AxumAppState, user_id: UserId, socket: WebSocket) {
    let hub = state.server_deps.hub.clone();
    let (handle, outbound) = hub.open_connection(user_id);
    let connection_id = handle.id;
    hub.register(handle.clone()).await;
    info!(user_id = %user_id, connection_id = %connection_id, "WebSocket connected");

    let (sink, stream) = socket.split();
    let reader = stream.map(|frame| frame.map(WsFrame::from));
    let writer = sink.with(|frame: WsFrame| future::ready(Ok::<_, axum::Error>(Message::from(frame))));

    run_connection(hub, handle, outbound, reader, writer, state.ws.clone()).await;
    info!(user_id = %user_id, connection_id = %connection_id, "WebSocket disconnected");
}

impl From<Message> for WsFrame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => WsFrame::Text(text),
            Message::Binary(data) => WsFrame::Binary(data),
            Message::Ping(data) => WsFrame::Ping(data),
            Message::Pong(data) => WsFrame::Pong(data),
            Message::Close(_) => WsFrame::Close,
        }
    }
}

impl From<WsFrame> for Message {
    fn from(frame: WsFrame) -> Self {
        match frame {
            WsFrame::Text(text) => Message::Text(text),
            WsFrame::Binary(data) => Message::Binary(data),
            WsFrame::Ping(data) => Message::Ping(data),
            WsFrame::Pong(data) => Message::Pong(data),
            WsFrame::Close => Message::Close(None),
        }
    }
}
