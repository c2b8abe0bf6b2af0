//! # murmur-store
//!
//! SQLite persistence for Murmur: users, one-to-one messages and the
//! session tokens issued by the auth service.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed helpers for every record kind.
//! Records are the shared wire types from `murmur-shared`, so they can be
//! handed straight to the HTTP layer.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod sessions;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use users::NewUser;
