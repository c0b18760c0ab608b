//! OpenAI-compatible gateway in front of the cookie-authenticated backend.
//!
//! Requests flow through four pieces: the prompt reducer flattens the message
//! list, the session registry maps a conversation id to a backend session,
//! the auth recovery controller wraps every backend call, and the translator
//! turns backend fragments into `chat.completion` payloads or SSE chunks.

pub mod config;
pub mod error;
pub mod prompt;
pub mod recovery;
pub mod registry;
pub mod server;
pub mod testing;
pub mod translate;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use prompt::{reduce, ValidationError};
pub use recovery::{AuthRecovery, RecoveryTurn};
pub use registry::{ConversationLease, ConversationState, SessionRegistry};
pub use server::GatewayServer;
pub use translate::{aggregate, translate, ChunkTranslator, TurnOutcome};
