use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::BusBackend;
use crate::error::{BusError, BusResult};
use crate::registry::TopicRegistry;
use crate::topic::BusEnvelope;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Cross-process transport over Redis pub/sub. Each topic maps to the
/// channel `{prefix}{topic}`; one pattern subscription per process feeds
/// the local registry.
pub struct RedisBackend {
    manager: ConnectionManager,
    prefix: String,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RedisBackend {
    pub async fn connect(url: &str, prefix: &str, registry: Arc<TopicRegistry>) -> BusResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;

        let listener = tokio::spawn(listen(client, prefix.to_string(), registry));
        info!(prefix = %prefix, "redis bus connected");

        Ok(Self {
            manager,
            prefix: prefix.to_string(),
            listener: Mutex::new(Some(listener)),
        })
    }

    fn channel(&self, envelope: &BusEnvelope) -> String {
        format!("{}{}", self.prefix, envelope.topic)
    }
}

async fn listen(client: redis::Client, prefix: String, registry: Arc<TopicRegistry>) {
    let pattern = format!("{prefix}*");

    loop {
        let mut pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                error!(error = %e, "failed to open redis pubsub connection, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        if let Err(e) = pubsub.psubscribe(pattern.as_str()).await {
            error!(error = %e, pattern = %pattern, "failed to subscribe to bus channels, retrying");
            tokio::time::sleep(RECONNECT_DELAY).await;
            continue;
        }
        info!(pattern = %pattern, "subscribed to bus channels");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, channel = %msg.get_channel_name(), "unreadable bus payload");
                    continue;
                }
            };

            match serde_json::from_str::<BusEnvelope>(&payload) {
                Ok(envelope) => {
                    registry.deliver(Arc::new(envelope)).await;
                }
                Err(e) => {
                    warn!(error = %e, channel = %msg.get_channel_name(), "discarding malformed bus envelope");
                }
            }
        }

        warn!("redis pubsub stream ended, reconnecting");
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

#[async_trait]
impl BusBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, envelope: Arc<BusEnvelope>) -> BusResult<()> {
        if self.listener.lock().await.is_none() {
            return Err(BusError::Closed);
        }

        let payload = serde_json::to_string(envelope.as_ref())?;
        let mut conn = self.manager.clone();
        let _receivers: i64 = conn.publish(self.channel(&envelope), payload).await?;
        Ok(())
    }

    async fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().await.take() {
            listener.abort();
            info!("redis bus listener stopped");
        }
    }
}
