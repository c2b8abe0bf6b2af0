//! Session registry: which identities are reachable, and through which
//! channel.
//!
//! One entry per identity. A reconnect replaces the prior entry
//! (last-write-wins); dropping the replaced handle closes the old
//! connection's outbound queue, which ends that connection.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use murmur_shared::{ServerEvent, UserId};

use crate::channel::{ChannelHandle, ConnectionId};

pub struct SessionRegistry {
    connections: RwLock<HashMap<UserId, ChannelHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register `channel` for `identity`, returning the handle it replaced.
    pub async fn register(&self, identity: UserId, channel: ChannelHandle) -> Option<ChannelHandle> {
        let conn = channel.id();
        let replaced = self.connections.write().await.insert(identity.clone(), channel);

        match &replaced {
            Some(old) => debug!(
                user = %identity,
                conn = %conn,
                replaced = %old.id(),
                "Channel replaced by reconnect"
            ),
            None => debug!(user = %identity, conn = %conn, "Channel registered"),
        }

        replaced
    }

    /// Remove the entry for `identity` only if it still belongs to `conn`.
    ///
    /// A disconnect arriving after a reconnect finds a newer connection id
    /// and leaves it in place. Returns whether an entry was removed.
    pub async fn unregister(&self, identity: &UserId, conn: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(identity) {
            Some(current) if current.id() == conn => {
                connections.remove(identity);
                debug!(user = %identity, conn = %conn, "Channel unregistered");
                true
            }
            Some(current) => {
                debug!(
                    user = %identity,
                    conn = %conn,
                    current = %current.id(),
                    "Ignoring stale disconnect"
                );
                false
            }
            None => false,
        }
    }

    /// The live channel for `identity`, if any. Offline is not an error.
    pub async fn lookup(&self, identity: &UserId) -> Option<ChannelHandle> {
        self.connections.read().await.get(identity).cloned()
    }

    /// Reachable identities, sorted.
    pub async fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.connections.read().await.keys().cloned().collect();
        users.sort();
        users
    }

    /// Best-effort push of `event` to every registered channel. Returns the
    /// number of channels that accepted it.
    pub async fn broadcast(&self, event: &ServerEvent) -> usize {
        let connections = self.connections.read().await;
        connections
            .iter()
            .filter(|(user, channel)| match channel.push(event.clone()) {
                Ok(()) => true,
                Err(e) => {
                    debug!(user = %user, error = %e, "Broadcast skipped channel");
                    false
                }
            })
            .count()
    }

    pub async fn connected_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = ChannelHandle::new(4);
        let id = handle.id();

        assert!(registry.register("alice".into(), handle).await.is_none());
        assert_eq!(registry.lookup(&"alice".into()).await.map(|h| h.id()), Some(id));
        assert!(registry.lookup(&"bob".into()).await.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_entry() {
        let registry = SessionRegistry::new();
        let (old, mut old_rx) = ChannelHandle::new(4);
        let (new, _new_rx) = ChannelHandle::new(4);
        let old_id = old.id();
        let new_id = new.id();

        registry.register("alice".into(), old).await;
        let replaced = registry.register("alice".into(), new).await;
        assert_eq!(replaced.map(|h| h.id()), Some(old_id));
        assert_eq!(registry.connected_count().await, 1);
        assert_eq!(registry.lookup(&"alice".into()).await.map(|h| h.id()), Some(new_id));

        // The replaced handle was the only sender for the old queue.
        assert!(old_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_newer_channel() {
        let registry = SessionRegistry::new();
        let (old, _old_rx) = ChannelHandle::new(4);
        let (new, _new_rx) = ChannelHandle::new(4);
        let old_id = old.id();
        let new_id = new.id();

        registry.register("alice".into(), old).await;
        registry.register("alice".into(), new).await;

        assert!(!registry.unregister(&"alice".into(), old_id).await);
        assert!(registry.lookup(&"alice".into()).await.is_some());

        assert!(registry.unregister(&"alice".into(), new_id).await);
        assert!(registry.lookup(&"alice".into()).await.is_none());
        assert!(!registry.unregister(&"alice".into(), new_id).await);
    }

    #[tokio::test]
    async fn test_online_users_and_broadcast() {
        let registry = SessionRegistry::new();
        let (bob, mut bob_rx) = ChannelHandle::new(4);
        let (alice, mut alice_rx) = ChannelHandle::new(4);
        registry.register("bob".into(), bob).await;
        registry.register("alice".into(), alice).await;

        let online = registry.online_users().await;
        assert_eq!(online, vec![UserId::new("alice"), UserId::new("bob")]);

        let event = ServerEvent::OnlineUsers(online);
        assert_eq!(registry.broadcast(&event).await, 2);
        assert_eq!(alice_rx.recv().await, Some(event.clone()));
        assert_eq!(bob_rx.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_concurrent_registrations() {
        let registry = Arc::new(SessionRegistry::new());
        let mut tasks = Vec::new();

        for i in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let user = UserId::new(format!("user-{i}"));
                let (handle, rx) = ChannelHandle::new(1);
                let id = handle.id();
                registry.register(user.clone(), handle).await;
                assert!(registry.lookup(&user).await.is_some());
                if i % 2 == 0 {
                    assert!(registry.unregister(&user, id).await);
                }
                drop(rx);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.connected_count().await, 16);
    }
}
