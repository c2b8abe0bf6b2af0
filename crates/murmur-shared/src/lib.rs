//! # murmur-shared
//!
//! Types shared by the Murmur server and client: identities, messages,
//! the realtime channel wire protocol and the error taxonomy.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{ChatError, ErrorKind};
pub use protocol::{ClientEvent, ServerEvent};
pub use types::{Message, MessageContent, MessageId, User, UserId};
