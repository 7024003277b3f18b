//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::domains::messages::MessageError;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Message(MessageError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl From<MessageError> for ApiError {
    fn from(err: MessageError) -> Self {
        ApiError::Message(err)
    }
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            ApiError::Message(err) => match err {
                MessageError::InvalidInput(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                MessageError::UserNotMemberOfChat => (StatusCode::FORBIDDEN, err.to_string()),
                MessageError::MessageDoesNotExist => (StatusCode::NOT_FOUND, err.to_string()),
                MessageError::Database(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                ),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Message(err @ MessageError::Database(_)) = &self {
            error!(error = %err, "Request failed");
        }

        let (status, message) = self.status_and_message();
        (
            status,
            Json(ErrorBody {
                error: message,
                status: status.as_u16(),
            }),
        )
            .into_response()
    }
}
