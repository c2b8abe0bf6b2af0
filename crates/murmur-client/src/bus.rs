//! Dispatch of inbound channel events to client-side listeners.
//!
//! The bus holds at most one `newMessage` listener. Attaching always clears
//! the previous one first, so a listener can never be registered twice.

use std::sync::{Arc, Mutex};

use murmur_shared::{Message, ServerEvent, UserId};

use crate::lock;

pub type MessageListener = Arc<dyn Fn(&Message) + Send + Sync>;
pub type PresenceListener = Arc<dyn Fn(&[UserId]) + Send + Sync>;

/// Proof of an attached `newMessage` listener.
///
/// Deliberately not `Clone`: detaching consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
}

#[derive(Default)]
struct Slots {
    next_id: u64,
    new_message: Option<(u64, MessageListener)>,
    presence: Option<PresenceListener>,
    received: u64,
}

#[derive(Default)]
pub struct EventBus {
    slots: Mutex<Slots>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any existing `newMessage` listener with `listener`.
    pub fn attach(&self, listener: MessageListener) -> SubscriptionHandle {
        let mut slots = lock(&self.slots);
        slots.next_id += 1;
        let id = slots.next_id;
        if slots.new_message.replace((id, listener)).is_some() {
            tracing::debug!("Cleared previous newMessage listener");
        }
        SubscriptionHandle { id }
    }

    /// Remove the listener behind `handle`. Returns false when it was
    /// already replaced by a later attach.
    pub fn detach(&self, handle: SubscriptionHandle) -> bool {
        let mut slots = lock(&self.slots);
        match &slots.new_message {
            Some((id, _)) if *id == handle.id => {
                slots.new_message = None;
                true
            }
            _ => false,
        }
    }

    /// Remove the `newMessage` listener whoever attached it.
    pub fn clear(&self) {
        lock(&self.slots).new_message = None;
    }

    pub fn active_listeners(&self) -> usize {
        usize::from(lock(&self.slots).new_message.is_some())
    }

    /// `newMessage` frames seen so far, duplicates included.
    pub fn messages_received(&self) -> u64 {
        lock(&self.slots).received
    }

    pub fn set_presence_listener(&self, listener: PresenceListener) {
        lock(&self.slots).presence = Some(listener);
    }

    /// Route one inbound event. Listeners run outside the bus lock.
    pub fn dispatch(&self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage(message) => {
                let listener = {
                    let mut slots = lock(&self.slots);
                    slots.received += 1;
                    slots.new_message.as_ref().map(|(_, l)| l.clone())
                };
                match listener {
                    Some(listener) => listener(&message),
                    None => tracing::debug!(message_id = %message.id, "No listener, dropping newMessage"),
                }
            }
            ServerEvent::OnlineUsers(users) => {
                let listener = lock(&self.slots).presence.clone();
                if let Some(listener) = listener {
                    listener(&users);
                }
            }
            ServerEvent::Error { kind, message } => {
                tracing::warn!(?kind, %message, "Server reported an error");
            }
        }
    }
}
