//! Message list → single backend prompt.
//!
//! The backend keeps its own history per session, so every request is
//! collapsed into one prompt: system and prior turns as labelled context,
//! then the focal (last) user message.

use dsk_protocol::{ChatMessage, Role};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("`messages` must not be empty")]
    EmptyMessages,

    #[error("`messages` must contain at least one user message")]
    NoUserMessage,
}

/// Reduce an ordered message list to a prompt.
///
/// `System: ..`, `User: ..` and `Assistant: ..` context lines are joined by
/// blank lines. The result is `<context>User: <focal>` when any context
/// exists, otherwise the focal content alone.
pub fn reduce(messages: &[ChatMessage]) -> Result<String, ValidationError> {
    if messages.is_empty() {
        return Err(ValidationError::EmptyMessages);
    }

    let focal = messages
        .iter()
        .rposition(|m| m.role == Role::User)
        .ok_or(ValidationError::NoUserMessage)?;

    let mut context = String::new();
    for (index, message) in messages.iter().enumerate() {
        if index == focal {
            continue;
        }
        context.push_str(message.role.label());
        context.push_str(": ");
        context.push_str(&message.text_content());
        context.push_str("\n\n");
    }

    let focal_content = messages[focal].text_content();
    if context.is_empty() {
        Ok(focal_content)
    } else {
        Ok(format!("{}User: {}", context, focal_content))
    }
}
