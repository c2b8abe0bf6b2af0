//! # murmur-server
//!
//! Realtime messaging backend:
//! - **REST API** (axum) for users, conversation history and sends
//! - **Delivery channel** over WebSocket, one per authenticated session
//! - **Session registry** mapping identities to their live channel
//! - **Message router** that persists, then pushes to the receiver

pub mod api;
pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod registry;
pub mod router;
pub mod store;

pub use api::{build_router, serve, AppState};
pub use config::ServerConfig;
pub use error::ServerError;
pub use store::SqliteStore;
