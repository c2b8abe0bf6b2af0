//! Realtime channel wire protocol.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": ...}`.

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ErrorKind};
use crate::types::{Message, MessageId, UserId};

/// Events a client sends over its channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Delivery trigger for a message that was already persisted through
    /// the HTTP send call. Never a persistence write.
    #[serde(rename = "sendMessage", rename_all = "camelCase")]
    SendMessage {
        receiver_id: UserId,
        sender_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        /// Id of the persisted message to relay.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
    },
}

/// Events the server pushes to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "newMessage")]
    NewMessage(Message),

    /// Identities currently reachable through a channel.
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers(Vec<UserId>),

    #[serde(rename = "error")]
    Error { kind: ErrorKind, message: String },
}

macro_rules! json_codec {
    ($ty:ty) => {
        impl $ty {
            pub fn to_json(&self) -> Result<String, ChatError> {
                serde_json::to_string(self).map_err(|e| ChatError::Protocol(e.to_string()))
            }

            pub fn from_json(frame: &str) -> Result<Self, ChatError> {
                serde_json::from_str(frame).map_err(|e| ChatError::Protocol(e.to_string()))
            }
        }
    };
}

json_codec!(ClientEvent);
json_codec!(ServerEvent);
