//! SQLite-backed repositories

pub mod conversation_repository;
pub mod message_repository;
pub mod user_repository;

pub use conversation_repository::ConversationRepository;
pub use message_repository::{ConversationLocks, MessageRepository};
pub use user_repository::UserRepository;
