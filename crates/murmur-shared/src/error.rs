use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy shared by both ends of the realtime core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Malformed content, rejected before persistence.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown peer or message.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A channel push failed. Logged, never retried; the message stays
    /// retrievable through a history fetch.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Connection or request without a valid identity.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Undecodable or out-of-contract channel frame.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Discriminant carried in channel error frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Auth,
    /// Server-side storage is gone; the channel is about to close.
    Unavailable,
}
