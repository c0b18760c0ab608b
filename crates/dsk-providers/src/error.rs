//! Backend error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Credential or cookies rejected; the caller may refresh and retry.
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    /// A single stream frame that could not be parsed. Never ends a stream.
    #[error("malformed fragment: {0}")]
    MalformedFragment(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BackendError {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired(_))
    }

    /// Transient faults: surfaced to the caller, never retried here.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Network(_) | Self::StreamError(_)
        )
    }
}
