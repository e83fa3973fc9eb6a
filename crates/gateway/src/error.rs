//! Error types for the gateway layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parley_auth::AuthError;
use parley_chats::ChatError;
use serde_json::json;
use thiserror::Error;

/// WebSocket close codes sent when a connection is refused or torn down.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const INTERNAL_ERROR: u16 = 1011;
    pub const MISSING_CREDENTIAL: u16 = 4001;
    pub const INVALID_CREDENTIAL: u16 = 4002;
    pub const FORBIDDEN: u16 = 4003;
    pub const UNKNOWN_USER: u16 = 4004;
}

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated
            | GatewayError::InvalidCredential(_)
            | GatewayError::UnknownUser(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// The close code used when this error refuses a socket.
    pub fn close_code(&self) -> u16 {
        match self {
            GatewayError::Unauthenticated => close_code::MISSING_CREDENTIAL,
            GatewayError::InvalidCredential(_) => close_code::INVALID_CREDENTIAL,
            GatewayError::UnknownUser(_) => close_code::UNKNOWN_USER,
            GatewayError::Forbidden(_) | GatewayError::NotFound(_) | GatewayError::InvalidRequest(_) => {
                close_code::FORBIDDEN
            }
            GatewayError::Unavailable(_) | GatewayError::Timeout(_) => close_code::INTERNAL_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated => "unauthenticated",
            GatewayError::InvalidCredential(_) => "invalid_credential",
            GatewayError::UnknownUser(_) => "unknown_user",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::InvalidRequest(_) => "validation_error",
            GatewayError::Unavailable(_) => "unavailable",
            GatewayError::Timeout(_) => "timeout",
        }
    }

    /// Short close reason; close frames cap the reason at 123 bytes.
    pub fn close_reason(&self) -> &'static str {
        match self.close_code() {
            close_code::MISSING_CREDENTIAL => "missing credential",
            close_code::INVALID_CREDENTIAL => "invalid credential",
            close_code::UNKNOWN_USER => "unknown user",
            close_code::FORBIDDEN => "forbidden",
            _ => "internal error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = json!({
            "error": status.as_str(),
            "code": self.code(),
            "message": self.to_string(),
        });

        (status, Json(error_response)).into_response()
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<AuthError> for GatewayError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingCredential => GatewayError::Unauthenticated,
            AuthError::UnknownUser(id) => GatewayError::UnknownUser(id),
            AuthError::Timeout(after) => GatewayError::Timeout(format!("identity verification after {after:?}")),
            err if err.is_invalid_credential() => GatewayError::InvalidCredential(err.to_string()),
            err => GatewayError::Unavailable(err.to_string()),
        }
    }
}

impl From<ChatError> for GatewayError {
    fn from(error: ChatError) -> Self {
        match error {
            ChatError::Validation { message } => GatewayError::InvalidRequest(message),
            ChatError::NotParticipant { conversation } => {
                GatewayError::Forbidden(format!("not a participant of {conversation}"))
            }
            err @ (ChatError::ConversationNotFound { .. }
            | ChatError::UserNotFound { .. }
            | ChatError::MessageNotFound { .. }) => GatewayError::NotFound(err.to_string()),
            ChatError::Unavailable { message } => GatewayError::Unavailable(message),
            err @ ChatError::Timeout { .. } => GatewayError::Timeout(err.to_string()),
            err @ (ChatError::UnhandledIntent { .. } | ChatError::InvalidFrame { .. }) => {
                GatewayError::InvalidRequest(err.to_string())
            }
        }
    }
}
