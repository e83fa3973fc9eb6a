//! Topic names and the identities carried on published events.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named broadcast channel. Every conversation has exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn conversation(conversation_id: &str) -> Self {
        Self(format!("conversation:{conversation_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-local identity of one live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who published an event; used to apply the echo policy on delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub connection_id: Option<ConnectionId>,
    pub user_id: String,
}

impl Origin {
    pub fn connection(connection_id: ConnectionId, user_id: impl Into<String>) -> Self {
        Self {
            connection_id: Some(connection_id),
            user_id: user_id.into(),
        }
    }

    /// An origin with no live socket, such as a REST write.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            connection_id: None,
            user_id: user_id.into(),
        }
    }
}

/// The unit carried across the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub topic: Topic,
    #[serde(default)]
    pub origin: Option<Origin>,
    pub payload: serde_json::Value,
    pub published_at: String,
}

impl BusEnvelope {
    pub fn new(topic: Topic, origin: Option<Origin>, payload: serde_json::Value) -> Self {
        Self {
            topic,
            origin,
            payload,
            published_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_topic_name() {
        assert_eq!(Topic::conversation("abc").as_str(), "conversation:abc");
    }

    #[test]
    fn envelope_survives_the_wire() {
        let envelope = BusEnvelope::new(
            Topic::conversation("abc"),
            Some(Origin::connection(ConnectionId::new(), "u1")),
            serde_json::json!({"type": "typing"}),
        );

        let encoded = serde_json::to_string(&envelope).unwrap();
        assert!(encoded.contains("\"topic\":\"conversation:abc\""));
        let decoded: BusEnvelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }
}
