//! Chat completion request/response types.

use serde::{Deserialize, Serialize};

use crate::messages::{ChatMessage, Role};

/// Body of `POST /v1/chat/completions`.
///
/// Sampling parameters are accepted for compatibility; the backend has no
/// equivalent knobs so they are not forwarded.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Conversation identifier when present.
    #[serde(default)]
    pub user: Option<String>,
}

impl ChatCompletionRequest {
    /// The caller-supplied conversation id, ignoring blank values.
    pub fn conversation_id(&self) -> Option<&str> {
        self.user
            .as_deref()
            .map(str::trim)
            .filter(|user| !user.is_empty())
    }
}

/// Assistant message inside a non-streaming choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: Role,
    pub content: String,
}

/// Chat completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

/// `chat.completion` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
}

impl ChatCompletionResponse {
    /// Single-choice response with `finish_reason = "stop"`.
    pub fn stop(id: String, created: i64, model: String, content: String) -> Self {
        Self {
            id,
            object: "chat.completion".to_string(),
            created,
            model,
            choices: vec![ChatChoice {
                index: 0,
                message: AssistantMessage {
                    role: Role::Assistant,
                    content,
                },
                finish_reason: "stop".to_string(),
            }],
        }
    }

    /// Content of the first choice.
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}
