//! Wire events exchanged with connected clients.

use parley_database::{Message, SenderSummary};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::ChatError;

/// Intents a client may send, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientIntent {
    SendMessage {
        content: String,
        /// Raw per-frame target; the gateway decides whether it is usable.
        conversation_id: Option<String>,
        temp_id: Option<String>,
    },
    MarkRead {
        conversation_id: Option<String>,
    },
    Typing {
        is_typing: bool,
    },
    Ping,
}

/// A frame that could not be turned into an intent.
#[derive(Debug)]
pub struct RejectedFrame {
    pub error: ChatError,
    pub temp_id: Option<String>,
}

fn string_field(frame: &Map<String, Value>, key: &str) -> Option<String> {
    frame.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Correlation ids are echoed verbatim; numeric ones are kept as text.
fn temp_id(frame: &Map<String, Value>) -> Option<String> {
    match frame.get("temp_id")? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

impl ClientIntent {
    pub fn parse(text: &str) -> Result<Self, RejectedFrame> {
        let value: Value = serde_json::from_str(text).map_err(|err| RejectedFrame {
            error: ChatError::invalid_frame(format!("frame is not valid JSON: {err}")),
            temp_id: None,
        })?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, RejectedFrame> {
        let Value::Object(frame) = value else {
            return Err(RejectedFrame {
                error: ChatError::invalid_frame("frame must be a JSON object"),
                temp_id: None,
            });
        };

        let temp_id = temp_id(&frame);
        let Some(kind) = frame.get("type").and_then(Value::as_str) else {
            return Err(RejectedFrame {
                error: ChatError::invalid_frame("frame has no string `type`"),
                temp_id,
            });
        };

        match kind {
            "chat.message" => Ok(Self::SendMessage {
                content: string_field(&frame, "content")
                    .or_else(|| string_field(&frame, "message"))
                    .unwrap_or_default(),
                conversation_id: string_field(&frame, "conversation_id"),
                temp_id,
            }),
            "chat.read" => Ok(Self::MarkRead {
                conversation_id: string_field(&frame, "conversation_id"),
            }),
            "typing" => Ok(Self::Typing {
                is_typing: frame.get("is_typing").and_then(Value::as_bool).unwrap_or(true),
            }),
            "ping" => Ok(Self::Ping),
            other => Err(RejectedFrame {
                error: ChatError::UnhandledIntent { kind: other.to_string() },
                temp_id,
            }),
        }
    }
}

/// The canonical message event every participant receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub message_id: String,
    pub content: String,
    pub sender: SenderSummary,
    pub conversation_id: String,
    pub timestamp: String,
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

impl MessageEvent {
    pub fn from_message(message: &Message, temp_id: Option<String>) -> Self {
        Self {
            message_id: message.public_id.clone(),
            content: message.content.clone(),
            sender: message.sender.clone(),
            conversation_id: message.conversation_public_id.clone(),
            timestamp: message.created_at.clone(),
            is_read: message.is_read,
            temp_id,
        }
    }
}

/// Events sent from the server, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "connection_established")]
    ConnectionEstablished {
        user_id: String,
        conversation_id: String,
        timestamp: String,
    },

    #[serde(rename = "chat.message")]
    ChatMessage(MessageEvent),

    #[serde(rename = "chat.message.ack")]
    MessageAck {
        message_id: String,
        conversation_id: String,
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },

    #[serde(rename = "error")]
    Error {
        error: String,
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },

    #[serde(rename = "messages.read")]
    MessagesRead {
        conversation_id: String,
        reader_id: String,
        count: u64,
        timestamp: String,
    },

    #[serde(rename = "typing")]
    Typing {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
    },

    #[serde(rename = "pong")]
    Pong { timestamp: String },
}

impl ServerEvent {
    pub fn error(err: &ChatError, temp_id: Option<String>) -> Self {
        Self::Error {
            error: err.to_string(),
            code: err.code().to_string(),
            temp_id,
        }
    }

    pub fn ack(message: &Message, temp_id: Option<String>) -> Self {
        Self::MessageAck {
            message_id: message.public_id.clone(),
            conversation_id: message.conversation_public_id.clone(),
            timestamp: message.created_at.clone(),
            temp_id,
        }
    }

    pub fn to_value(&self) -> Result<Value, ChatError> {
        serde_json::to_value(self).map_err(|err| ChatError::unavailable(format!("event encoding: {err}")))
    }

    pub fn to_text(&self) -> Result<String, ChatError> {
        serde_json::to_string(self).map_err(|err| ChatError::unavailable(format!("event encoding: {err}")))
    }
}
