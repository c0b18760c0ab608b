use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dsk_auth::RefreshError;
use dsk_protocol::ErrorBody;
use dsk_providers::BackendError;
use thiserror::Error;

use crate::prompt::ValidationError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("backend rejected credentials after a cookie refresh: {0}")]
    AuthStillExpired(String),

    #[error("cookie refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    #[error("Gateway server error: {0}")]
    ServerError(String),
}

impl From<ValidationError> for GatewayError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Refresh(err) if err.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OpenAI-style `error.type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::Backend(_) | Self::ServerError(_) => "server_error",
            Self::AuthStillExpired(_) => "authentication_error",
            Self::Refresh(err) if err.is_timeout() => "timeout_error",
            Self::Refresh(_) => "refresh_error",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody::new(self.error_type(), self.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(self.body())).into_response()
    }
}
