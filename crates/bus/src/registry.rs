//! Local topic membership and delivery.

use std::collections::HashMap;
use std::sync::Arc;

use parley_config::EchoPolicy;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::topic::{BusEnvelope, ConnectionId, Origin, Topic};

pub type EnvelopeSender = mpsc::Sender<Arc<BusEnvelope>>;
pub type EnvelopeReceiver = mpsc::Receiver<Arc<BusEnvelope>>;

#[derive(Debug, Clone)]
pub struct Subscriber {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub sender: EnvelopeSender,
}

impl Subscriber {
    fn is_origin(&self, origin: &Origin, policy: EchoPolicy) -> bool {
        match policy {
            EchoPolicy::SameConnection => origin.connection_id == Some(self.connection_id),
            EchoPolicy::SameUser => origin.user_id == self.user_id,
        }
    }
}

/// Connections joined to each topic in this process.
pub struct TopicRegistry {
    topics: RwLock<HashMap<Topic, HashMap<ConnectionId, Subscriber>>>,
    echo_policy: EchoPolicy,
}

impl TopicRegistry {
    pub fn new(echo_policy: EchoPolicy) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            echo_policy,
        }
    }

    pub fn echo_policy(&self) -> EchoPolicy {
        self.echo_policy
    }

    pub async fn join(&self, topic: Topic, subscriber: Subscriber) {
        let mut topics = self.topics.write().await;
        debug!(
            topic = %topic,
            connection = %subscriber.connection_id,
            user = %subscriber.user_id,
            "joined topic"
        );
        topics
            .entry(topic)
            .or_default()
            .insert(subscriber.connection_id, subscriber);
    }

    /// Returns `false` when the connection was not joined.
    pub async fn leave(&self, topic: &Topic, connection_id: ConnectionId) -> bool {
        let mut topics = self.topics.write().await;
        let Some(members) = topics.get_mut(topic) else {
            return false;
        };

        let removed = members.remove(&connection_id).is_some();
        if members.is_empty() {
            topics.remove(topic);
        }
        if removed {
            debug!(topic = %topic, connection = %connection_id, "left topic");
        }
        removed
    }

    pub async fn members(&self, topic: &Topic) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Hand the envelope to every local subscriber of its topic except those
    /// the echo policy excludes. Returns the number of subscribers reached.
    ///
    /// A subscriber whose buffer is full is evicted. Dropping its sender ends
    /// the owning socket's outbound channel, which closes the socket.
    pub async fn deliver(&self, envelope: Arc<BusEnvelope>) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        let mut lagging = Vec::new();

        {
            let topics = self.topics.read().await;
            let Some(members) = topics.get(&envelope.topic) else {
                return 0;
            };

            for subscriber in members.values() {
                if let Some(origin) = envelope.origin.as_ref() {
                    if subscriber.is_origin(origin, self.echo_policy) {
                        continue;
                    }
                }

                match subscriber.sender.try_send(Arc::clone(&envelope)) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            topic = %envelope.topic,
                            connection = %subscriber.connection_id,
                            user = %subscriber.user_id,
                            "subscriber buffer full, evicting"
                        );
                        lagging.push(subscriber.connection_id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(subscriber.connection_id);
                    }
                }
            }
        }

        if !closed.is_empty() || !lagging.is_empty() {
            let mut topics = self.topics.write().await;
            if let Some(members) = topics.get_mut(&envelope.topic) {
                for connection_id in &lagging {
                    members.remove(connection_id);
                }
                for connection_id in &closed {
                    if members
                        .get(connection_id)
                        .is_some_and(|subscriber| subscriber.sender.is_closed())
                    {
                        members.remove(connection_id);
                        debug!(topic = %envelope.topic, connection = %connection_id, "pruned closed subscriber");
                    }
                }
                if members.is_empty() {
                    topics.remove(&envelope.topic);
                }
            }
        }

        delivered
    }
}
