//! dsk Protocol - OpenAI-compatible wire types
//!
//! This crate defines the request and response shapes exposed by the bridge:
//! - Chat messages with string or multi-part content
//! - `chat.completion` responses and `chat.completion.chunk` stream frames
//! - Model listings and the structured error body

mod chat;
mod error;
mod messages;
mod models;
mod streaming;

pub use chat::*;
pub use error::*;
pub use messages::*;
pub use models::*;
pub use streaming::*;

/// Generate an OpenAI-style completion id (`chatcmpl-<uuid>`).
pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4())
}

/// Current time as epoch seconds, the unit used by every `created` field.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
