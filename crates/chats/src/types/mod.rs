//! Wire events and error types shared by the gateway and the dispatcher.

pub mod errors;
pub mod events;

pub use errors::{ChatError, ChatResult};
pub use events::{ClientIntent, MessageEvent, RejectedFrame, ServerEvent};
