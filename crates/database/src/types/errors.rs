//! Error types for the database layer

use std::time::Duration;
use thiserror::Error;

/// Failures while bringing the database up
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("Database migration error: {0}")]
    MigrationError(String),
}

/// Failures of store operations. `ConversationNotFound`, `UserNotFound`,
/// `NotParticipant` and `Validation` are terminal; the rest may succeed on a
/// later attempt.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("user {user} is not a participant of conversation {conversation}")]
    NotParticipant { user: String, conversation: String },

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Timeout(_))
    }
}
