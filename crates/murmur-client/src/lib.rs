//! # murmur-client
//!
//! Client side of Murmur: the HTTP API client, the realtime channel, and
//! the session-scoped [`ChatStore`] that keeps exactly one `newMessage`
//! listener bound to the selected peer.

pub mod api;
pub mod bus;
pub mod config;
pub mod connection;
pub mod error;
pub mod notifications;
pub mod store;
pub mod subscription;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use api::{ChatApi, HttpChatApi};
pub use bus::{EventBus, SubscriptionHandle};
pub use config::ClientConfig;
pub use connection::{ChannelConnection, ChannelSender};
pub use error::{ClientError, Result};
pub use notifications::NotificationCounter;
pub use store::{ChatStore, FetchOutcome};
pub use subscription::SubscriptionManager;

// Listener callbacks cannot propagate errors, and every critical section
// leaves state consistent, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
