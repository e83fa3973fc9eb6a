//! Message entity definitions

use serde::{Deserialize, Serialize};

use super::user::SenderSummary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(skip_serializing)]
    pub id: i64,
    pub public_id: String,
    #[serde(skip_serializing)]
    pub conversation_id: i64,
    pub conversation_public_id: String,
    pub sender: SenderSummary,
    pub content: String,
    pub is_read: bool,
    /// RFC 3339 with microsecond precision, UTC; sorts lexicographically
    pub created_at: String,
}
