//! Backend client traits

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::BackendError;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Backend chat session handle.
pub type SessionId = String;

/// Fragments in arrival order. Consumable once; dropping it closes the
/// underlying connection.
pub type FragmentStream = Pin<Box<dyn Stream<Item = BackendResult<RawFragment>> + Send>>;

/// One incremental unit of generated text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFragment {
    pub content: String,
    /// Non-null marks the end of the sequence.
    pub finish_reason: Option<String>,
    /// Backend message id; becomes the parent of the next turn.
    pub raw_id: Option<String>,
    pub raw_created_at: Option<i64>,
}

impl RawFragment {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn terminal(finish_reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(finish_reason.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.raw_id = Some(id.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// A prompt submission to an existing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub session_id: SessionId,
    pub prompt: String,
    pub parent_message_id: Option<String>,
    pub thinking_enabled: bool,
    pub search_enabled: bool,
}

impl CompletionRequest {
    pub fn new(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: prompt.into(),
            parent_message_id: None,
            thinking_enabled: false,
            search_enabled: false,
        }
    }

    pub fn with_parent(mut self, parent_message_id: Option<String>) -> Self {
        self.parent_message_id = parent_message_id;
        self
    }
}

/// The two operations the gateway needs from the backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Create a new backend chat session.
    async fn create_session(&self) -> BackendResult<SessionId>;

    /// Submit a prompt and receive its fragments lazily.
    async fn complete(&self, request: CompletionRequest) -> BackendResult<FragmentStream>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}
