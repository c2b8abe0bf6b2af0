//! Seams to the external persistence and auth collaborators.

use std::sync::{Arc, Mutex, MutexGuard};

use murmur_shared::{Message, MessageContent, MessageId, User, UserId};
use murmur_store::{Database, StoreError};

use crate::error::{Result, ServerError};

/// Persisted users and messages.
pub trait MessageStore: Send + Sync {
    /// Persist a message. Fails with a validation error on empty content.
    fn create_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: MessageContent,
    ) -> Result<Message>;

    /// Conversation between two users ordered by creation time, oldest first.
    fn list_messages(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>>;

    /// Every user except the caller.
    fn list_users(&self, caller: &UserId) -> Result<Vec<User>>;

    fn get_user(&self, id: &UserId) -> Result<User>;

    fn user_exists(&self, id: &UserId) -> Result<bool>;

    fn get_message(&self, id: MessageId) -> Result<Option<Message>>;
}

/// Resolves the identity behind a session token. The token was issued and
/// verified by the auth service; this only looks it up.
pub trait AuthContext: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Option<UserId>>;
}

/// Run a store call on the blocking pool so SQLite I/O never stalls the
/// async workers.
pub async fn blocking<S, T, F>(store: &Arc<S>, f: F) -> Result<T>
where
    S: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| ServerError::Internal(format!("store task failed: {e}")))?
}

/// [`MessageStore`] and [`AuthContext`] over the SQLite store.
pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|e| ServerError::StoreUnavailable(format!("Lock poisoned: {e}")))
    }
}

impl MessageStore for SqliteStore {
    fn create_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: MessageContent,
    ) -> Result<Message> {
        Ok(self.db()?.insert_message(sender, receiver, content)?)
    }

    fn list_messages(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        Ok(self.db()?.messages_between(a, b)?)
    }

    fn list_users(&self, caller: &UserId) -> Result<Vec<User>> {
        Ok(self.db()?.list_users_except(caller)?)
    }

    fn get_user(&self, id: &UserId) -> Result<User> {
        self.db()?.get_user(id).map_err(|e| match e {
            StoreError::NotFound => ServerError::NotFound(format!("unknown user {id}")),
            other => other.into(),
        })
    }

    fn user_exists(&self, id: &UserId) -> Result<bool> {
        Ok(self.db()?.user_exists(id)?)
    }

    fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        match self.db()?.get_message(id) {
            Ok(message) => Ok(Some(message)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl AuthContext for SqliteStore {
    fn authenticate(&self, token: &str) -> Result<Option<UserId>> {
        Ok(self.db()?.user_for_session(token)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_store::NewUser;

    #[test]
    fn test_errors_map_to_taxonomy() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&NewUser::new("alice", "alice@example.com", "Alice")).unwrap();
        db.insert_user(&NewUser::new("bob", "bob@example.com", "Bob")).unwrap();
        let store = SqliteStore::new(db);

        let err = store
            .create_message(&"alice".into(), &"bob".into(), MessageContent::default())
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));

        let err = store.get_user(&"mallory".into()).unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));

        assert!(store.get_message(MessageId::new()).unwrap().is_none());
        assert_eq!(store.authenticate("missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_blocking_runs_off_the_runtime() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&NewUser::new("alice", "alice@example.com", "Alice")).unwrap();
        let store: Arc<dyn MessageStore> = Arc::new(SqliteStore::new(db));

        let user = blocking(&store, |s| s.get_user(&"alice".into())).await.unwrap();
        assert_eq!(user.full_name, "Alice");

        let err = blocking(&store, |s| s.get_user(&"mallory".into())).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }
}
