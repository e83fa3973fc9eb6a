//! Entity definitions for the messaging store

pub mod conversation;
pub mod message;
pub mod user;

pub use conversation::{normalize_conversation_id, Conversation, CreateConversationRequest};
pub use message::Message;
pub use user::{CreateUserRequest, SenderSummary, User};
