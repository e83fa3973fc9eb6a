//! Storage seams consumed by the gateway, the dispatcher and access control.
//! The SQLite repositories implement all three; tests substitute their own.

use async_trait::async_trait;

use crate::entities::{Message, User};
use crate::types::StoreResult;

/// Answers "is this user a participant of this conversation".
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Unknown conversations and unknown users both yield `Ok(false)`.
    async fn is_participant(&self, user_id: &str, conversation_id: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, public_id: &str) -> StoreResult<Option<User>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Atomically re-checks membership, inserts the message and touches the
    /// conversation's `updated_at` with the message timestamp.
    async fn persist(
        &self,
        sender_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> StoreResult<Message>;

    /// Flags every unread message not sent by `reader_id` as read. Returns
    /// the number of rows changed.
    async fn mark_read(&self, conversation_id: &str, reader_id: &str) -> StoreResult<u64>;

    async fn find_message(&self, public_id: &str) -> StoreResult<Message>;

    /// The latest `limit` messages, oldest first.
    async fn list_messages(&self, conversation_id: &str, limit: i64) -> StoreResult<Vec<Message>>;
}
