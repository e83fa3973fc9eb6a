//! Conversation entity definitions

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(skip_serializing)]
    pub id: i64,
    pub public_id: String,
    pub name: Option<String>,
    pub is_group: bool,
    /// Participant public ids in join order
    pub participants: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    pub participant_ids: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: Option<bool>,
}

/// Conversation ids are UUIDs on the wire. Returns the canonical
/// (lowercase, hyphenated) form or `None` when `raw` is malformed.
pub fn normalize_conversation_id(raw: &str) -> Option<String> {
    uuid::Uuid::parse_str(raw.trim())
        .ok()
        .map(|id| id.hyphenated().to_string())
}
