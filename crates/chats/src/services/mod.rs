//! Services shared by the live gateway and the background write path.

pub mod access_control;
pub mod notification_dispatcher;
pub mod unread_counter;

pub use access_control::AccessControl;
pub use notification_dispatcher::{DispatchJob, NotificationDispatcher};
pub use unread_counter::{unread_key, MemoryUnreadCounter, RedisUnreadCounter, UnreadCounter};
