use chrono::Utc;
use rusqlite::params;

use murmur_shared::{Message, MessageContent, MessageId, UserId};

use crate::database::{decode_ts, encode_ts, not_found, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Persist a new message and return it with its assigned id and
    /// creation time.
    pub fn insert_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: MessageContent,
    ) -> Result<Message> {
        let content = content
            .validate()
            .map_err(|e| StoreError::Validation(e.to_string()))?;

        let message = Message {
            id: MessageId::new(),
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            text: content.text,
            image: content.image,
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, text, image, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                message.sender_id.as_str(),
                message.receiver_id.as_str(),
                message.text,
                message.image,
                encode_ts(&message.created_at),
            ],
        )?;

        Ok(message)
    }

    /// Conversation between two users, oldest first.
    pub fn messages_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, text, image, created_at
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![a.as_str(), b.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, sender_id, receiver_id, text, image, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender: String = row.get(1)?;
    let receiver: String = row.get(2)?;
    let ts_str: String = row.get(5)?;

    let id = id_str.parse::<MessageId>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id,
        sender_id: UserId(sender),
        receiver_id: UserId(receiver),
        text: row.get(3)?,
        image: row.get(4)?,
        created_at: decode_ts(5, &ts_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::NewUser;

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        for (id, name) in [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol")] {
            db.insert_user(&NewUser::new(id, format!("{id}@example.com"), name))
                .unwrap();
        }
        db
    }

    #[test]
    fn test_insert_assigns_id_and_time() {
        let db = seeded();
        let msg = db
            .insert_message(&"alice".into(), &"bob".into(), MessageContent::text(" hi "))
            .unwrap();
        assert_eq!(msg.text.as_deref(), Some("hi"));

        let loaded = db.get_message(msg.id).unwrap();
        assert_eq!(loaded.id, msg.id);
        assert_eq!(loaded.sender_id, UserId::new("alice"));
    }

    #[test]
    fn test_empty_content_rejected() {
        let db = seeded();
        let err = db
            .insert_message(&"alice".into(), &"bob".into(), MessageContent::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(db.messages_between(&"alice".into(), &"bob".into()).unwrap().is_empty());
    }

    #[test]
    fn test_conversation_is_symmetric_and_ordered() {
        let db = seeded();
        let alice: UserId = "alice".into();
        let bob: UserId = "bob".into();
        let carol: UserId = "carol".into();

        let m1 = db.insert_message(&alice, &bob, MessageContent::text("one")).unwrap();
        let m2 = db.insert_message(&bob, &alice, MessageContent::text("two")).unwrap();
        db.insert_message(&alice, &carol, MessageContent::text("elsewhere")).unwrap();
        let m3 = db
            .insert_message(&alice, &bob, MessageContent::image("https://img/3.png"))
            .unwrap();

        let ab: Vec<_> = db.messages_between(&alice, &bob).unwrap().into_iter().map(|m| m.id).collect();
        let ba: Vec<_> = db.messages_between(&bob, &alice).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ab, vec![m1.id, m2.id, m3.id]);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_unknown_receiver_violates_fk() {
        let db = seeded();
        let err = db
            .insert_message(&"alice".into(), &"mallory".into(), MessageContent::text("hi"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[test]
    fn test_get_missing_message() {
        let db = seeded();
        assert!(matches!(db.get_message(MessageId::new()), Err(StoreError::NotFound)));
    }
}
