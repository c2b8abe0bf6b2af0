use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use murmur_shared::{ChatError, ErrorKind, ServerEvent};
use murmur_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The persistence store cannot be reached. Fatal for the session.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Whether the session that hit this error cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServerError::StoreUnavailable(_) | ServerError::Internal(_))
    }

    /// Error frame reported to a channel client.
    pub fn to_event(&self) -> ServerEvent {
        let kind = match self {
            ServerError::Validation(_) => ErrorKind::Validation,
            ServerError::Unauthorized(_) => ErrorKind::Auth,
            ServerError::NotFound(_) => ErrorKind::NotFound,
            ServerError::StoreUnavailable(_) | ServerError::Internal(_) => ErrorKind::Unavailable,
        };
        ServerEvent::Error {
            kind,
            message: self.to_string(),
        }
    }
}

impl From<ChatError> for ServerError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Validation(m) => ServerError::Validation(m),
            ChatError::NotFound(m) => ServerError::NotFound(m),
            ChatError::Auth(m) => ServerError::Unauthorized(m),
            ChatError::Delivery(m) | ChatError::Protocol(m) => ServerError::Internal(m),
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(m) => ServerError::Validation(m),
            StoreError::NotFound => ServerError::NotFound("record not found".into()),
            other => ServerError::StoreUnavailable(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::StoreUnavailable(_) => {
                tracing::error!(error = %self, "store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable".to_string())
            }
            ServerError::Internal(_) => {
                tracing::error!(error = %self, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
