//! Transports that move envelopes between processes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BusResult;
use crate::topic::BusEnvelope;

mod memory;
mod pubsub;

pub use self::memory::MemoryBackend;
pub use self::pubsub::RedisBackend;

#[async_trait]
pub trait BusBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fan the envelope out to every process subscribed to its topic,
    /// including this one.
    async fn publish(&self, envelope: Arc<BusEnvelope>) -> BusResult<()>;

    async fn shutdown(&self);
}
