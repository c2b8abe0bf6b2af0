//! Per-sender unread counts for conversations that are not on screen.

use std::collections::HashMap;

use murmur_shared::UserId;

#[derive(Debug, Clone, Default)]
pub struct NotificationCounter {
    counts: HashMap<UserId, u32>,
}

impl NotificationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a message from `sender`, unless it belongs to the open conversation.
    /// Returns whether the counter moved.
    pub fn on_arrival(&mut self, sender: &UserId, selected: Option<&UserId>) -> bool {
        if selected == Some(sender) {
            return false;
        }
        let count = self.counts.entry(sender.clone()).or_insert(0);
        *count = count.saturating_add(1);
        true
    }

    pub fn on_select(&mut self, peer: &UserId) {
        self.counts.remove(peer);
    }

    pub fn count(&self, peer: &UserId) -> u32 {
        self.counts.get(peer).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().fold(0u32, |acc, c| acc.saturating_add(*c))
    }

    /// Senders with unread messages, sorted by id.
    pub fn unread(&self) -> Vec<(UserId, u32)> {
        let mut unread: Vec<_> = self
            .counts
            .iter()
            .filter(|(_, c)| **c > 0)
            .map(|(id, c)| (id.clone(), *c))
            .collect();
        unread.sort();
        unread
    }
}
