//! # Parley Chats Crate
//!
//! Conversation-level behavior that sits between the gateway and storage:
//!
//! - **Types**: the client/server wire events and [`ChatError`]
//! - **Services**: [`AccessControl`], unread counters and the
//!   [`NotificationDispatcher`] for writes that bypass the live send flow

pub mod services;
pub mod types;

pub use services::{
    unread_key, AccessControl, DispatchJob, MemoryUnreadCounter, NotificationDispatcher,
    RedisUnreadCounter, UnreadCounter,
};
pub use types::{ChatError, ChatResult, ClientIntent, MessageEvent, RejectedFrame, ServerEvent};
