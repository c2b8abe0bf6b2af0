//! Session token records.
//!
//! Tokens are minted by the auth service at login and resolved here on
//! every authenticated request or channel handshake.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use murmur_shared::UserId;

use crate::database::{encode_ts, Database};
use crate::error::Result;

impl Database {
    /// Record a fresh session token for `user` and return it.
    pub fn create_session(&self, user: &UserId) -> Result<String> {
        let token = Uuid::new_v4().simple().to_string();
        self.conn().execute(
            "INSERT INTO sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![token, user.as_str(), encode_ts(&Utc::now())],
        )?;
        Ok(token)
    }

    pub fn user_for_session(&self, token: &str) -> Result<Option<UserId>> {
        let id: Option<String> = self
            .conn()
            .query_row(
                "SELECT user_id FROM sessions WHERE token = ?1",
                params![token],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(UserId))
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(affected > 0)
    }
}
