use thiserror::Error;

use murmur_shared::ChatError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authenticated: {0}")]
    Auth(String),

    #[error("No conversation selected")]
    NoPeerSelected,

    /// The server answered but its store is gone.
    #[error("Server unavailable: {0}")]
    Unavailable(String),

    /// The server could not be reached.
    #[error("Connection error: {0}")]
    Connectivity(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Errors that end the session rather than a single action.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Unavailable(_) | ClientError::Connectivity(_))
    }
}

impl From<ChatError> for ClientError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Validation(m) => ClientError::Validation(m),
            ChatError::NotFound(m) => ClientError::NotFound(m),
            ChatError::Auth(m) => ClientError::Auth(m),
            ChatError::Delivery(m) | ChatError::Protocol(m) => ClientError::Protocol(m),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Protocol(err.to_string())
        } else {
            ClientError::Connectivity(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
