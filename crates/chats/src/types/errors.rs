//! Error types for conversation operations.

use std::time::Duration;

use parley_bus::BusError;
use parley_database::StoreError;
use thiserror::Error;

/// Result type alias for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Failures surfaced to a single connection or request. None of them tear a
/// connection down; the gateway turns them into `error` events.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Not a participant of conversation {conversation}")]
    NotParticipant { conversation: String },

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("User not found: {id}")]
    UserNotFound { id: String },

    #[error("Message not found: {id}")]
    MessageNotFound { id: String },

    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },

    #[error("Unhandled intent: {kind}")]
    UnhandledIntent { kind: String },

    #[error("Invalid frame: {message}")]
    InvalidFrame { message: String },
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_participant(conversation: impl Into<String>) -> Self {
        Self::NotParticipant { conversation: conversation.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into() }
    }

    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame { message: message.into() }
    }

    /// Stable code carried in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::NotParticipant { .. } => "not_participant",
            Self::ConversationNotFound { .. } => "conversation_not_found",
            Self::UserNotFound { .. } => "user_not_found",
            Self::MessageNotFound { .. } => "message_not_found",
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::UnhandledIntent { .. } => "unhandled_intent",
            Self::InvalidFrame { .. } => "invalid_frame",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConversationNotFound(id) => Self::ConversationNotFound { id },
            StoreError::UserNotFound(id) => Self::UserNotFound { id },
            StoreError::NotParticipant { conversation, .. } => Self::NotParticipant { conversation },
            StoreError::MessageNotFound(id) => Self::MessageNotFound { id },
            StoreError::Validation(message) => Self::Validation { message },
            StoreError::Timeout(after) => Self::Timeout { operation: "store", after },
            StoreError::Database(err) => Self::Unavailable {
                message: format!("store: {err}"),
            },
        }
    }
}

impl From<BusError> for ChatError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Timeout(after) => Self::Timeout { operation: "bus publish", after },
            other => Self::Unavailable {
                message: format!("bus: {other}"),
            },
        }
    }
}

impl From<redis::RedisError> for ChatError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable {
            message: format!("cache: {err}"),
        }
    }
}
