//! CRUD operations for [`User`] records.

use chrono::Utc;
use rusqlite::params;

use murmur_shared::{User, UserId};

use crate::database::{decode_ts, encode_ts, not_found, Database};
use crate::error::Result;

/// Fields supplied by the signup flow when a user is created.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub profile_pic: Option<String>,
}

impl NewUser {
    pub fn new(id: impl Into<String>, email: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            email: email.into(),
            full_name: full_name.into(),
            profile_pic: None,
        }
    }
}

impl Database {
    pub fn insert_user(&self, new_user: &NewUser) -> Result<User> {
        let user = User {
            id: new_user.id.clone(),
            email: new_user.email.clone(),
            full_name: new_user.full_name.clone(),
            profile_pic: new_user.profile_pic.clone(),
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO users (id, email, full_name, profile_pic, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.as_str(),
                user.email,
                user.full_name,
                user.profile_pic,
                encode_ts(&user.created_at),
            ],
        )?;

        tracing::debug!(user = %user.id, "user created");
        Ok(user)
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, email, full_name, profile_pic, created_at
                 FROM users WHERE id = ?1",
                params![id.as_str()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn user_exists(&self, id: &UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Every user except `caller`, ordered by display name.
    pub fn list_users_except(&self, caller: &UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, email, full_name, profile_pic, created_at
             FROM users
             WHERE id != ?1
             ORDER BY full_name COLLATE NOCASE, id",
        )?;

        let rows = stmt.query_map(params![caller.as_str()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let ts: String = row.get(4)?;
    Ok(User {
        id: UserId(id),
        email: row.get(1)?,
        full_name: row.get(2)?,
        profile_pic: row.get(3)?,
        created_at: decode_ts(4, &ts)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&NewUser::new("alice", "alice@example.com", "Alice")).unwrap();
        db.insert_user(&NewUser::new("bob", "bob@example.com", "bob")).unwrap();
        db.insert_user(&NewUser::new("carol", "carol@example.com", "Carol")).unwrap();
        db
    }

    #[test]
    fn test_list_users_excludes_caller() {
        let db = seeded();
        let users = db.list_users_except(&"alice".into()).unwrap();
        let ids: Vec<_> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["bob", "carol"]);
    }

    #[test]
    fn test_get_user_and_exists() {
        let db = seeded();
        let bob = db.get_user(&"bob".into()).unwrap();
        assert_eq!(bob.email, "bob@example.com");
        assert!(db.user_exists(&"bob".into()).unwrap());
        assert!(!db.user_exists(&"mallory".into()).unwrap());
        assert!(matches!(db.get_user(&"mallory".into()), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let db = seeded();
        let dup = NewUser::new("alice2", "alice@example.com", "Alice Again");
        assert!(matches!(db.insert_user(&dup), Err(StoreError::Sqlite(_))));
    }
}
