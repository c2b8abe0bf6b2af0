//! Message router: persist first, then push to the receiver if reachable.

use std::sync::Arc;

use tracing::{debug, info, warn};

use murmur_shared::{ClientEvent, Message, MessageContent, ServerEvent, UserId};

use crate::error::{Result, ServerError};
use crate::registry::SessionRegistry;
use crate::store::{blocking, MessageStore};

/// Outcome of a best-effort push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the receiver's channel.
    Pushed,
    /// Receiver has no channel; the message waits for the next history fetch.
    Offline,
    /// The push failed. Not retried.
    Failed,
    /// Nothing to deliver (a send event without a persisted message id).
    Skipped,
}

pub struct MessageRouter {
    store: Arc<dyn MessageStore>,
    registry: Arc<SessionRegistry>,
}

impl MessageRouter {
    pub fn new(store: Arc<dyn MessageStore>, registry: Arc<SessionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Persist a message from `sender` to `receiver`, then push it.
    ///
    /// The store write is the durability boundary: when it fails nothing is
    /// pushed and the error goes back to the caller. Push failures are
    /// logged only.
    pub async fn on_send(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: MessageContent,
    ) -> Result<Message> {
        let content = content.validate()?;

        if sender == receiver {
            return Err(ServerError::Validation("cannot send a message to yourself".into()));
        }
        let (from, to) = (sender.clone(), receiver.clone());
        let message = blocking(&self.store, move |s| {
            if !s.user_exists(&to)? {
                return Err(ServerError::NotFound(format!("unknown user {to}")));
            }
            s.create_message(&from, &to, content)
        })
        .await?;
        info!(
            msg_id = %message.id,
            sender = %sender,
            receiver = %receiver,
            "Message persisted"
        );

        self.push(&message).await;
        Ok(message)
    }

    /// Handle a `sendMessage` channel event from `authenticated`.
    ///
    /// The event only triggers delivery of a message that is already in the
    /// store; it never writes one.
    pub async fn relay(&self, authenticated: &UserId, event: ClientEvent) -> Result<Delivery> {
        let ClientEvent::SendMessage {
            receiver_id,
            sender_id,
            message_id,
            ..
        } = event;

        if &sender_id != authenticated {
            warn!(
                user = %authenticated,
                claimed = %sender_id,
                "Rejecting send event for another sender"
            );
            return Err(ServerError::Unauthorized("sender does not match session".into()));
        }

        let Some(id) = message_id else {
            debug!(user = %authenticated, receiver = %receiver_id, "Send event without message id");
            return Ok(Delivery::Skipped);
        };

        let Some(message) = blocking(&self.store, move |s| s.get_message(id)).await? else {
            debug!(user = %authenticated, msg_id = %id, "Send event for unknown message");
            return Ok(Delivery::Skipped);
        };

        if message.sender_id != sender_id || message.receiver_id != receiver_id {
            return Err(ServerError::Unauthorized(format!(
                "message {id} does not belong to this conversation"
            )));
        }

        Ok(self.push(&message).await)
    }

    /// Broadcast the current set of reachable identities.
    pub async fn publish_presence(&self) {
        let online = self.registry.online_users().await;
        let count = online.len();
        let reached = self.registry.broadcast(&ServerEvent::OnlineUsers(online)).await;
        debug!(online = count, reached, "Presence published");
    }

    async fn push(&self, message: &Message) -> Delivery {
        let Some(channel) = self.registry.lookup(&message.receiver_id).await else {
            debug!(msg_id = %message.id, receiver = %message.receiver_id, "Receiver offline");
            return Delivery::Offline;
        };

        match channel.push(ServerEvent::NewMessage(message.clone())) {
            Ok(()) => {
                debug!(msg_id = %message.id, receiver = %message.receiver_id, "Message pushed");
                Delivery::Pushed
            }
            Err(e) => {
                warn!(
                    msg_id = %message.id,
                    receiver = %message.receiver_id,
                    error = %e,
                    "Push failed, message stays in history"
                );
                Delivery::Failed
            }
        }
    }
}
