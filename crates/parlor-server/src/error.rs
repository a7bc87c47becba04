//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parlor_core::ChatError;
use parlor_protocol::codes;
use thiserror::Error;
use tracing::error;

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request was malformed.
    #[error("{0}")]
    BadRequest(String),

    /// Storage failed.
    #[error("storage unavailable")]
    Unavailable(#[source] ChatError),

    /// Anything else.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::StorageUnavailable(_) => ApiError::Unavailable(err),
            ChatError::InvalidRoomName(_) | ChatError::InvalidDisplayName(_) => {
                ApiError::BadRequest(err.to_string())
            }
            _ => ApiError::Internal(err.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = ?self, "Request failed");
        }
        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Error frame code for a core error.
#[must_use]
pub fn frame_code(err: &ChatError) -> u16 {
    match err {
        ChatError::DuplicateRoom(_) => codes::DUPLICATE_ROOM,
        ChatError::InvalidRoomName(_) => codes::INVALID_ROOM,
        ChatError::InvalidDisplayName(_) => codes::INVALID_FRAME,
        ChatError::NotJoined(_) => codes::NOT_JOINED,
        ChatError::NotBound => codes::NOT_BOUND,
        ChatError::StorageUnavailable(_) => codes::STORAGE_UNAVAILABLE,
        ChatError::UnknownConnection(_) => codes::INTERNAL,
    }
}
