use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::BusBackend;
use crate::error::{BusError, BusResult};
use crate::registry::TopicRegistry;
use crate::topic::BusEnvelope;

/// Single-process transport: publishing delivers straight into the local
/// registry.
pub struct MemoryBackend {
    registry: Arc<TopicRegistry>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new(registry: Arc<TopicRegistry>) -> Self {
        Self {
            registry,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BusBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, envelope: Arc<BusEnvelope>) -> BusResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        self.registry.deliver(envelope).await;
        Ok(())
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
