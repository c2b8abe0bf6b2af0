use std::sync::Arc;

use murmur_shared::UserId;

use crate::bus::{EventBus, MessageListener, SubscriptionHandle};

#[derive(Debug, Default)]
pub enum SubscriptionState {
    #[default]
    Detached,
    Attached {
        peer: UserId,
        handle: SubscriptionHandle,
    },
}

/// Keeps the bus listener bound to exactly one peer, or to none.
pub struct SubscriptionManager {
    bus: Arc<EventBus>,
    state: SubscriptionState,
}

impl SubscriptionManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            state: SubscriptionState::Detached,
        }
    }

    /// Bind `listener` to `peer`, dropping whatever was attached before.
    pub fn attach(&mut self, peer: UserId, listener: MessageListener) {
        self.detach();
        self.bus.clear();
        let handle = self.bus.attach(listener);
        tracing::debug!(%peer, "Subscribed to newMessage");
        self.state = SubscriptionState::Attached { peer, handle };
    }

    /// Returns true if a listener was attached.
    pub fn detach(&mut self) -> bool {
        match std::mem::take(&mut self.state) {
            SubscriptionState::Attached { peer, handle } => {
                if !self.bus.detach(handle) {
                    tracing::debug!(%peer, "Listener was already replaced");
                }
                true
            }
            SubscriptionState::Detached => false,
        }
    }

    pub fn peer(&self) -> Option<&UserId> {
        match &self.state {
            SubscriptionState::Attached { peer, .. } => Some(peer),
            SubscriptionState::Detached => None,
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.state, SubscriptionState::Attached { .. })
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.detach();
    }
}
