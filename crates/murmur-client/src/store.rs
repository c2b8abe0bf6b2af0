//! Session-scoped chat state.
//!
//! One [`ChatStore`] per logged-in user. It owns the conversation shown on
//! screen, the unread counters, and the single `newMessage` subscription,
//! which always follows the selected peer.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

use murmur_shared::{ClientEvent, Message, MessageContent, MessageId, User, UserId};

use crate::api::ChatApi;
use crate::bus::{EventBus, MessageListener};
use crate::connection::ChannelSender;
use crate::error::{ClientError, Result};
use crate::lock;
use crate::notifications::NotificationCounter;
use crate::subscription::SubscriptionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The history replaced the visible conversation.
    Applied(usize),
    /// The selection changed while the fetch was in flight.
    Discarded,
}

struct ChatState {
    users: Vec<User>,
    messages: Vec<Message>,
    selected: Option<User>,
    /// Bumped on every selection change. Fetches issued under an older
    /// epoch are discarded on completion.
    epoch: u64,
    users_loading: bool,
    messages_loading: bool,
    notifications: NotificationCounter,
    /// Ids already counted as unread, so a relayed copy is not counted twice.
    counted: HashSet<MessageId>,
    online: HashSet<UserId>,
    subscription: SubscriptionManager,
}

impl ChatState {
    fn selected_id(&self) -> Option<&UserId> {
        self.selected.as_ref().map(|u| &u.id)
    }

    fn push_unique(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Install fetched history, keeping live arrivals the fetch did not include.
    fn apply_history(&mut self, history: Vec<Message>) {
        let fetched: HashSet<_> = history.iter().map(|m| m.id).collect();
        let live: Vec<_> = std::mem::take(&mut self.messages)
            .into_iter()
            .filter(|m| !fetched.contains(&m.id))
            .collect();
        self.messages = history;
        self.messages.extend(live);
    }

    fn on_new_message(&mut self, me: &UserId, bound_peer: &UserId, message: &Message) -> bool {
        if message.receiver_id != *me {
            tracing::debug!(message_id = %message.id, "Ignoring message addressed to someone else");
            return false;
        }
        if message.sender_id == *bound_peer {
            self.push_unique(message.clone())
        } else {
            if !self.counted.insert(message.id) {
                return false;
            }
            let selected = self.selected.as_ref().map(|u| u.id.clone());
            self.notifications
                .on_arrival(&message.sender_id, selected.as_ref())
        }
    }
}

struct Shared {
    state: Mutex<ChatState>,
    revision: watch::Sender<u64>,
}

impl Shared {
    fn changed(&self) {
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
    }
}

pub struct ChatStore {
    me: UserId,
    api: Arc<dyn ChatApi>,
    bus: Arc<EventBus>,
    shared: Arc<Shared>,
    channel: Mutex<Option<ChannelSender>>,
}

impl ChatStore {
    pub fn new(me: UserId, api: Arc<dyn ChatApi>, bus: Arc<EventBus>) -> Self {
        let (revision, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(ChatState {
                users: Vec::new(),
                messages: Vec::new(),
                selected: None,
                epoch: 0,
                users_loading: false,
                messages_loading: false,
                notifications: NotificationCounter::new(),
                counted: HashSet::new(),
                online: HashSet::new(),
                subscription: SubscriptionManager::new(bus.clone()),
            }),
            revision,
        });

        let weak = Arc::downgrade(&shared);
        bus.set_presence_listener(Arc::new(move |users: &[UserId]| {
            if let Some(shared) = weak.upgrade() {
                lock(&shared.state).online = users.iter().cloned().collect();
                shared.changed();
            }
        }));

        Self {
            me,
            api,
            bus,
            shared,
            channel: Mutex::new(None),
        }
    }

    /// Relay confirmed sends over `channel` as `sendMessage` events.
    pub fn set_channel(&self, channel: ChannelSender) {
        *lock(&self.channel) = Some(channel);
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    /// Receiver that ticks on every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub async fn get_users(&self) -> Result<Vec<User>> {
        lock(&self.shared.state).users_loading = true;
        let result = self.api.list_users().await;

        let mut state = lock(&self.shared.state);
        state.users_loading = false;
        let outcome = match result {
            Ok(users) => {
                state.users = users.clone();
                Ok(users)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load users");
                Err(e)
            }
        };
        drop(state);
        self.shared.changed();
        outcome
    }

    /// Load the history with `peer`. The result is only applied if `peer`
    /// is still the selected peer when the fetch completes.
    pub async fn get_messages(&self, peer: &UserId) -> Result<FetchOutcome> {
        let epoch = {
            let mut state = lock(&self.shared.state);
            if state.selected_id() == Some(peer) {
                state.messages_loading = true;
            }
            state.epoch
        };
        self.shared.changed();

        let result = self.api.list_messages(peer).await;

        let mut state = lock(&self.shared.state);
        if state.epoch != epoch || state.selected_id() != Some(peer) {
            // A store that went away matters whichever peer is selected now.
            return match result {
                Err(e) if e.is_fatal() => {
                    tracing::warn!(%peer, error = %e, "Stale fetch hit a fatal error");
                    Err(e)
                }
                _ => {
                    tracing::debug!(%peer, "Discarding stale history");
                    Ok(FetchOutcome::Discarded)
                }
            };
        }
        state.messages_loading = false;
        let outcome = match result {
            Ok(history) => {
                let count = history.len();
                state.apply_history(history);
                Ok(FetchOutcome::Applied(count))
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "Failed to load messages");
                Err(e)
            }
        };
        drop(state);
        self.shared.changed();
        outcome
    }

    /// Send to the selected peer. The conversation only grows once the
    /// server has accepted the message.
    pub async fn send_message(&self, content: MessageContent) -> Result<Message> {
        let content = content.validate()?;
        let (peer, epoch) = {
            let state = lock(&self.shared.state);
            let peer = state.selected_id().cloned().ok_or(ClientError::NoPeerSelected)?;
            (peer, state.epoch)
        };

        let message = self.api.send_message(&peer, &content).await?;

        let mut state = lock(&self.shared.state);
        if state.epoch == epoch && state.selected_id() == Some(&peer) {
            state.push_unique(message.clone());
        }
        drop(state);
        self.shared.changed();
        self.relay(&message);
        Ok(message)
    }

    /// Nudge the server to push an already persisted message. Failures are
    /// only logged; the receiver still gets it from history.
    fn relay(&self, message: &Message) {
        let Some(channel) = lock(&self.channel).clone() else {
            return;
        };
        let event = ClientEvent::SendMessage {
            receiver_id: message.receiver_id.clone(),
            sender_id: message.sender_id.clone(),
            text: message.text.clone(),
            message_id: Some(message.id),
        };
        if let Err(e) = channel.emit(event) {
            tracing::debug!(message_id = %message.id, error = %e, "Relay not sent");
        }
    }

    /// Bind the `newMessage` listener to the selected peer. Calling it again
    /// rebinds rather than adding a second listener. Returns false when no
    /// peer is selected.
    pub fn subscribe(&self) -> bool {
        let mut state = lock(&self.shared.state);
        let Some(peer) = state.selected_id().cloned() else {
            return false;
        };
        let listener = self.listener_for(peer.clone());
        state.subscription.attach(peer, listener);
        true
    }

    pub fn unsubscribe(&self) {
        if lock(&self.shared.state).subscription.detach() {
            tracing::debug!("Unsubscribed from newMessage");
        }
    }

    /// Change the open conversation. Resets the peer's unread count and
    /// rebinds the subscription in one step. History must be fetched
    /// separately; see [`ChatStore::select_peer`].
    pub fn set_selected_peer(&self, peer: Option<User>) {
        let mut state = lock(&self.shared.state);
        state.epoch += 1;
        state.messages.clear();
        state.messages_loading = false;
        match peer {
            Some(user) => {
                state.notifications.on_select(&user.id);
                let listener = self.listener_for(user.id.clone());
                state.subscription.attach(user.id.clone(), listener);
                tracing::debug!(peer = %user.id, "Selected conversation");
                state.selected = Some(user);
            }
            None => {
                state.subscription.detach();
                state.selected = None;
            }
        }
        drop(state);
        self.shared.changed();
    }

    /// Open a conversation and load its history. `None` closes it.
    pub async fn select_peer(&self, peer: Option<User>) -> Result<FetchOutcome> {
        let id = peer.as_ref().map(|u| u.id.clone());
        self.set_selected_peer(peer);
        match id {
            Some(id) => self.get_messages(&id).await,
            None => Ok(FetchOutcome::Applied(0)),
        }
    }

    fn listener_for(&self, peer: UserId) -> MessageListener {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let me = self.me.clone();
        Arc::new(move |message: &Message| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let moved = lock(&shared.state).on_new_message(&me, &peer, message);
            if moved {
                shared.changed();
            }
        })
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.shared.state).messages.clone()
    }

    pub fn users(&self) -> Vec<User> {
        lock(&self.shared.state).users.clone()
    }

    pub fn find_user(&self, id: &UserId) -> Option<User> {
        lock(&self.shared.state)
            .users
            .iter()
            .find(|u| u.id == *id)
            .cloned()
    }

    pub fn selected_peer(&self) -> Option<User> {
        lock(&self.shared.state).selected.clone()
    }

    pub fn unread(&self, peer: &UserId) -> u32 {
        lock(&self.shared.state).notifications.count(peer)
    }

    /// Senders with unread messages and their counts.
    pub fn unread_senders(&self) -> Vec<(UserId, u32)> {
        lock(&self.shared.state).notifications.unread()
    }

    pub fn total_unread(&self) -> u32 {
        lock(&self.shared.state).notifications.total()
    }

    pub fn is_online(&self, peer: &UserId) -> bool {
        lock(&self.shared.state).online.contains(peer)
    }

    pub fn is_users_loading(&self) -> bool {
        lock(&self.shared.state).users_loading
    }

    pub fn is_messages_loading(&self) -> bool {
        lock(&self.shared.state).messages_loading
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.shared.state).subscription.is_attached() && self.bus.active_listeners() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::Utc;
    use murmur_shared::ServerEvent;
    use tokio::sync::{oneshot, Notify};

    const ME: &str = "bob";

    fn user(id: &str) -> User {
        User {
            id: UserId::from(id),
            full_name: id.to_uppercase(),
            email: format!("{id}@example.com"),
            profile_pic: None,
            created_at: Utc::now(),
        }
    }

    fn message(from: &str, to: &str, text: &str) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: UserId::from(from),
            receiver_id: UserId::from(to),
            text: Some(text.into()),
            image: None,
            created_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct FakeApi {
        histories: Mutex<HashMap<UserId, Vec<Message>>>,
        gates: Mutex<HashMap<UserId, oneshot::Receiver<()>>>,
        entered: Notify,
        fail_send: Mutex<bool>,
        failures: Mutex<HashMap<UserId, ClientError>>,
    }

    impl FakeApi {
        fn with_history(self, peer: &str, history: Vec<Message>) -> Self {
            self.histories.lock().unwrap().insert(UserId::from(peer), history);
            self
        }

        /// Hold the next history fetch for `peer` until the sender fires.
        fn gate(&self, peer: &str) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().insert(UserId::from(peer), rx);
            tx
        }

        /// Fail the next history fetch for `peer` with `err`.
        fn fail_history(&self, peer: &str, err: ClientError) {
            self.failures.lock().unwrap().insert(UserId::from(peer), err);
        }
    }

    #[async_trait]
    impl ChatApi for FakeApi {
        async fn current_user(&self) -> Result<User> {
            Ok(user(ME))
        }

        async fn list_users(&self) -> Result<Vec<User>> {
            Ok(vec![user("alice"), user("carol")])
        }

        async fn list_messages(&self, peer: &UserId) -> Result<Vec<Message>> {
            let gate = self.gates.lock().unwrap().remove(peer);
            if let Some(gate) = gate {
                self.entered.notify_one();
                let _ = gate.await;
            }
            if let Some(err) = self.failures.lock().unwrap().remove(peer) {
                return Err(err);
            }
            Ok(self
                .histories
                .lock()
                .unwrap()
                .get(peer)
                .cloned()
                .unwrap_or_default())
        }

        async fn send_message(&self, peer: &UserId, content: &MessageContent) -> Result<Message> {
            if *self.fail_send.lock().unwrap() {
                return Err(ClientError::Unavailable("store offline".into()));
            }
            Ok(Message {
                id: MessageId::new(),
                sender_id: UserId::from(ME),
                receiver_id: peer.clone(),
                text: content.text.clone(),
                image: content.image.clone(),
                created_at: Utc::now(),
            })
        }
    }

    fn setup(api: FakeApi) -> (Arc<FakeApi>, Arc<EventBus>, ChatStore) {
        let api = Arc::new(api);
        let bus = Arc::new(EventBus::new());
        let store = ChatStore::new(UserId::from(ME), api.clone(), bus.clone());
        (api, bus, store)
    }

    #[tokio::test]
    async fn test_rebinding_keeps_single_listener() {
        let (_api, bus, store) = setup(FakeApi::default());

        for peer in ["alice", "carol", "alice"] {
            store.select_peer(Some(user(peer))).await.unwrap();
            assert_eq!(bus.active_listeners(), 1);
        }
        assert!(store.subscribe());
        assert!(store.subscribe());
        assert_eq!(bus.active_listeners(), 1);

        bus.dispatch(ServerEvent::NewMessage(message("alice", ME, "once")));
        assert_eq!(store.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_live_message_from_selected_peer() {
        let (_api, bus, store) = setup(FakeApi::default());
        store.select_peer(Some(user("alice"))).await.unwrap();

        let msg = message("alice", ME, "hi");
        bus.dispatch(ServerEvent::NewMessage(msg.clone()));
        bus.dispatch(ServerEvent::NewMessage(msg.clone()));

        assert_eq!(store.messages(), vec![msg]);
        assert_eq!(store.unread(&UserId::from("alice")), 0);
    }

    #[tokio::test]
    async fn test_message_from_other_sender_counts_unread() {
        let (_api, bus, store) = setup(FakeApi::default());
        store.select_peer(Some(user("carol"))).await.unwrap();

        let psst = message("alice", ME, "psst");
        bus.dispatch(ServerEvent::NewMessage(psst.clone()));
        bus.dispatch(ServerEvent::NewMessage(psst));
        assert!(store.messages().is_empty());
        assert_eq!(store.unread(&UserId::from("alice")), 1);
        assert_eq!(store.total_unread(), 1);
        assert_eq!(store.unread_senders(), vec![(UserId::from("alice"), 1)]);

        store.select_peer(Some(user("alice"))).await.unwrap();
        assert_eq!(store.unread(&UserId::from("alice")), 0);
    }

    #[tokio::test]
    async fn test_message_for_someone_else_is_ignored() {
        let (_api, bus, store) = setup(FakeApi::default());
        store.select_peer(Some(user("alice"))).await.unwrap();

        bus.dispatch(ServerEvent::NewMessage(message("alice", "carol", "not yours")));
        assert!(store.messages().is_empty());
        assert_eq!(store.total_unread(), 0);
    }

    #[tokio::test]
    async fn test_stale_fetch_is_discarded() {
        let alice_history = vec![message("alice", ME, "from alice")];
        let carol_history = vec![message("carol", ME, "from carol")];
        let api = FakeApi::default()
            .with_history("alice", alice_history)
            .with_history("carol", carol_history.clone());
        let (api, _bus, store) = setup(api);
        let store = Arc::new(store);

        let release = api.gate("alice");
        let slow = tokio::spawn({
            let store = store.clone();
            async move { store.select_peer(Some(user("alice"))).await }
        });
        api.entered.notified().await;

        let outcome = store.select_peer(Some(user("carol"))).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Applied(1));

        release.send(()).unwrap();
        assert_eq!(slow.await.unwrap().unwrap(), FetchOutcome::Discarded);

        assert_eq!(store.messages(), carol_history);
        assert_eq!(store.selected_peer().map(|u| u.id), Some(UserId::from("carol")));
    }

    #[tokio::test]
    async fn test_stale_fetch_still_reports_lost_store() {
        let carol_history = vec![message("carol", ME, "from carol")];
        let api = FakeApi::default().with_history("carol", carol_history.clone());
        let (api, _bus, store) = setup(api);
        let store = Arc::new(store);

        let release = api.gate("alice");
        api.fail_history("alice", ClientError::Unavailable("store offline".into()));
        let slow = tokio::spawn({
            let store = store.clone();
            async move { store.select_peer(Some(user("alice"))).await }
        });
        api.entered.notified().await;

        store.select_peer(Some(user("carol"))).await.unwrap();
        release.send(()).unwrap();

        let err = slow.await.unwrap().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(store.messages(), carol_history);
    }

    #[tokio::test]
    async fn test_stale_fetch_drops_recoverable_error() {
        let (api, _bus, store) = setup(FakeApi::default());
        let store = Arc::new(store);

        let release = api.gate("alice");
        api.fail_history("alice", ClientError::NotFound("alice".into()));
        let slow = tokio::spawn({
            let store = store.clone();
            async move { store.select_peer(Some(user("alice"))).await }
        });
        api.entered.notified().await;

        store.select_peer(Some(user("carol"))).await.unwrap();
        release.send(()).unwrap();
        assert_eq!(slow.await.unwrap().unwrap(), FetchOutcome::Discarded);
    }

    #[tokio::test]
    async fn test_live_arrival_during_fetch_is_kept() {
        let old = message("alice", ME, "old");
        let api = FakeApi::default().with_history("alice", vec![old.clone()]);
        let (api, bus, store) = setup(api);
        let store = Arc::new(store);

        let release = api.gate("alice");
        let fetch = tokio::spawn({
            let store = store.clone();
            async move { store.select_peer(Some(user("alice"))).await }
        });
        api.entered.notified().await;
        assert!(store.is_messages_loading());

        let live = message("alice", ME, "live");
        bus.dispatch(ServerEvent::NewMessage(live.clone()));
        release.send(()).unwrap();
        fetch.await.unwrap().unwrap();

        assert_eq!(store.messages(), vec![old, live]);
        assert!(!store.is_messages_loading());
    }

    #[tokio::test]
    async fn test_send_requires_selection() {
        let (_api, _bus, store) = setup(FakeApi::default());
        let err = store.send_message(MessageContent::text("hi")).await.unwrap_err();
        assert!(matches!(err, ClientError::NoPeerSelected));
    }

    #[tokio::test]
    async fn test_send_validates_before_network() {
        let (api, _bus, store) = setup(FakeApi::default());
        *api.fail_send.lock().unwrap() = true;
        store.select_peer(Some(user("alice"))).await.unwrap();

        let err = store.send_message(MessageContent::text("   ")).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[tokio::test]
    async fn test_failed_send_leaves_history() {
        let (api, _bus, store) = setup(FakeApi::default());
        store.select_peer(Some(user("alice"))).await.unwrap();
        *api.fail_send.lock().unwrap() = true;

        let err = store.send_message(MessageContent::text("hi")).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn test_sent_message_is_appended_once() {
        let (_api, bus, store) = setup(FakeApi::default());
        store.select_peer(Some(user("alice"))).await.unwrap();

        let sent = store.send_message(MessageContent::text(" hi ")).await.unwrap();
        assert_eq!(sent.text.as_deref(), Some("hi"));
        assert_eq!(store.messages(), vec![sent.clone()]);

        // Own messages are never pushed back to the sender.
        bus.dispatch(ServerEvent::NewMessage(sent));
        assert_eq!(store.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_confirmed_send_is_relayed() {
        let (api, _bus, store) = setup(FakeApi::default());
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        store.set_channel(ChannelSender::new(tx));
        store.select_peer(Some(user("alice"))).await.unwrap();

        let sent = store.send_message(MessageContent::text("hi")).await.unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::SendMessage {
                receiver_id: UserId::from("alice"),
                sender_id: UserId::from(ME),
                text: Some("hi".into()),
                message_id: Some(sent.id),
            }
        );

        *api.fail_send.lock().unwrap() = true;
        assert!(store.send_message(MessageContent::text("lost")).await.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closing_conversation_detaches() {
        let (_api, bus, store) = setup(FakeApi::default());
        store.select_peer(Some(user("alice"))).await.unwrap();
        assert!(store.is_subscribed());

        store.select_peer(None).await.unwrap();
        assert_eq!(bus.active_listeners(), 0);
        assert!(!store.subscribe());

        bus.dispatch(ServerEvent::NewMessage(message("alice", ME, "late")));
        assert!(store.messages().is_empty());
        assert_eq!(store.total_unread(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_on_teardown() {
        let (_api, bus, store) = setup(FakeApi::default());
        store.select_peer(Some(user("alice"))).await.unwrap();
        store.unsubscribe();
        assert_eq!(bus.active_listeners(), 0);

        assert!(store.subscribe());
        assert_eq!(bus.active_listeners(), 1);

        drop(store);
        assert_eq!(bus.active_listeners(), 0);
    }

    #[tokio::test]
    async fn test_presence_and_users() {
        let (_api, bus, store) = setup(FakeApi::default());
        let users = store.get_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert!(!store.is_users_loading());
        assert!(store.find_user(&UserId::from("carol")).is_some());

        let mut changes = store.changes();
        bus.dispatch(ServerEvent::OnlineUsers(vec![UserId::from("alice")]));
        assert!(changes.has_changed().unwrap());
        assert!(store.is_online(&UserId::from("alice")));
        assert!(!store.is_online(&UserId::from("carol")));
    }
}
