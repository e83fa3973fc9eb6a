//! Parley Broadcast Bus
//!
//! Topic-based fan-out between live connections. Connections join the topic
//! of their conversation in the process they are attached to; published
//! events travel through a [`BusBackend`] to every process and are then
//! delivered to the local members of the topic, minus the ones excluded by
//! the configured [`EchoPolicy`].

use std::sync::Arc;
use std::time::Duration;

use parley_config::{BusBackendKind, BusConfig, EchoPolicy};
use tracing::{debug, info};

pub mod backend;
pub mod error;
pub mod registry;
pub mod topic;

pub use backend::{BusBackend, MemoryBackend, RedisBackend};
pub use error::{BusError, BusResult};
pub use registry::{EnvelopeReceiver, EnvelopeSender, Subscriber, TopicRegistry};
pub use topic::{BusEnvelope, ConnectionId, Origin, Topic};

#[derive(Clone)]
pub struct Bus {
    registry: Arc<TopicRegistry>,
    backend: Arc<dyn BusBackend>,
    publish_timeout: Duration,
}

impl Bus {
    pub fn new(registry: Arc<TopicRegistry>, backend: Arc<dyn BusBackend>, publish_timeout: Duration) -> Self {
        Self {
            registry,
            backend,
            publish_timeout,
        }
    }

    /// A bus confined to this process.
    pub fn in_memory(echo_policy: EchoPolicy, publish_timeout: Duration) -> Self {
        let registry = Arc::new(TopicRegistry::new(echo_policy));
        let backend = Arc::new(MemoryBackend::new(Arc::clone(&registry)));
        Self::new(registry, backend, publish_timeout)
    }

    /// Build the bus the configuration asks for.
    pub async fn connect(
        config: &BusConfig,
        echo_policy: EchoPolicy,
        publish_timeout: Duration,
    ) -> BusResult<Self> {
        match config.backend {
            BusBackendKind::Memory => Ok(Self::in_memory(echo_policy, publish_timeout)),
            BusBackendKind::Redis => {
                let registry = Arc::new(TopicRegistry::new(echo_policy));
                let backend =
                    RedisBackend::connect(&config.redis_url, &config.channel_prefix, Arc::clone(&registry))
                        .await?;
                Ok(Self::new(registry, Arc::new(backend), publish_timeout))
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn echo_policy(&self) -> EchoPolicy {
        self.registry.echo_policy()
    }

    pub async fn join(&self, topic: &Topic, connection_id: ConnectionId, user_id: &str, sender: EnvelopeSender) {
        self.registry
            .join(
                topic.clone(),
                Subscriber {
                    connection_id,
                    user_id: user_id.to_string(),
                    sender,
                },
            )
            .await;
    }

    /// Idempotent; returns whether the connection was joined.
    pub async fn leave(&self, topic: &Topic, connection_id: ConnectionId) -> bool {
        self.registry.leave(topic, connection_id).await
    }

    pub async fn members(&self, topic: &Topic) -> usize {
        self.registry.members(topic).await
    }

    pub async fn publish(
        &self,
        topic: &Topic,
        origin: Option<Origin>,
        payload: serde_json::Value,
    ) -> BusResult<()> {
        let envelope = Arc::new(BusEnvelope::new(topic.clone(), origin, payload));

        tokio::time::timeout(self.publish_timeout, self.backend.publish(envelope))
            .await
            .map_err(|_| BusError::Timeout(self.publish_timeout))??;

        debug!(topic = %topic, backend = self.backend.name(), "event published");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.backend.shutdown().await;
        info!(backend = self.backend.name(), "bus shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn publish_reaches_joined_connections() {
        let bus = Bus::in_memory(EchoPolicy::SameConnection, Duration::from_secs(1));
        let topic = Topic::conversation("c1");
        let (tx, mut rx) = mpsc::channel(8);
        bus.join(&topic, ConnectionId::new(), "b", tx).await;

        bus.publish(&topic, Some(Origin::user("a")), json!({"type": "chat.message", "content": "hi"}))
            .await
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.payload["content"], "hi");
        assert_eq!(envelope.origin.as_ref().unwrap().user_id, "a");
    }

    #[tokio::test]
    async fn publish_after_shutdown_fails() {
        let bus = Bus::in_memory(EchoPolicy::SameConnection, Duration::from_secs(1));
        bus.shutdown().await;

        let err = bus
            .publish(&Topic::conversation("c1"), None, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Closed));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn memory_config_selects_memory_backend() {
        let bus = Bus::connect(&BusConfig::default(), EchoPolicy::SameUser, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(bus.backend_name(), "memory");
        assert_eq!(bus.echo_policy(), EchoPolicy::SameUser);
    }
}
