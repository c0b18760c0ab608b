use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Cookie artifact is missing required cookie `{0}`")]
    MissingCookie(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AuthError>;
