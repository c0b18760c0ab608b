//! Server-Sent Events (SSE) frame types for streamed chat completions.

use serde::{Deserialize, Serialize};

/// Marker sent as the final `data:` payload of every stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// `chat.completion.chunk` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

/// Chat choice with delta for streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

/// Incremental content. Serialises to `{}` when empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    fn new(
        id: &str,
        created: i64,
        model: &str,
        delta: ChunkDelta,
        finish_reason: Option<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    /// A content delta with no finish reason.
    pub fn content(id: &str, created: i64, model: &str, text: impl Into<String>) -> Self {
        let delta = ChunkDelta {
            content: Some(text.into()),
        };
        Self::new(id, created, model, delta, None)
    }

    /// The terminating frame: empty delta, `finish_reason = "stop"`.
    pub fn stop(id: &str, created: i64, model: &str) -> Self {
        Self::new(id, created, model, ChunkDelta::default(), Some("stop".to_string()))
    }

    pub fn delta_content(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.delta.content.as_deref())
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }
}
