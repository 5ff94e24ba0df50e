//! Transport error mapping.
//!
//! Error kinds are transport-independent; this module pins their HTTP
//! status codes. Tool-level failures never reach here - they live inside
//! the event stream.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use crewdesk_core::error::AgentError;
use crewdesk_core::provider::ProviderError;
use crewdesk_core::sandbox::SandboxError;
use crewdesk_store::StoreError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("provider failure: {0}")]
    ProviderFailure(String),

    #[error("provider timeout")]
    ProviderTimeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ProviderFailure(_) => StatusCode::BAD_GATEWAY,
            Self::ProviderTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("not found".to_string()),
            StoreError::Auth(message) => Self::Auth(message),
            StoreError::Conflict(message) => Self::Conflict(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<SandboxError> for ApiError {
    fn from(err: SandboxError) -> Self {
        // From direct endpoints the sandbox rejection is a client error;
        // inside tools it never bubbles this far.
        Self::Validation(err.to_string())
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unknown { name } => Self::Validation(format!("unknown provider: {name}")),
            ProviderError::Disabled { name } => {
                Self::Validation(format!("provider '{name}' is not enabled"))
            }
            ProviderError::Timeout { .. } => Self::ProviderTimeout,
            other => Self::ProviderFailure(other.to_string()),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::ProviderFailure(message) => Self::ProviderFailure(message),
            AgentError::ProviderTimeout => Self::ProviderTimeout,
            AgentError::Cancelled => Self::Cancelled,
        }
    }
}
