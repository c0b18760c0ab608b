//! dsk Providers - backend chat client
//!
//! The backend exposes two operations: create a chat session, and submit a
//! prompt to a session receiving an event stream of content fragments.
//! [`ChatBackend`] is the capability the gateway depends on;
//! [`DeepSeekClient`] is the HTTP implementation.

mod classify;
mod config;
mod deepseek;
mod error;
mod traits;

pub use classify::{classify_envelope, classify_status};
pub use config::{BackendConfig, DEFAULT_BASE_URL, DEFAULT_USER_AGENT};
pub use deepseek::DeepSeekClient;
pub use error::BackendError;
pub use traits::{
    BackendResult, ChatBackend, CompletionRequest, FragmentStream, RawFragment, SessionId,
};
