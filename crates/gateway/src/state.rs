//! Shared application state for the gateway

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parley_auth::{Authenticator, JwtVerifier};
use parley_bus::{Bus, Origin, Topic};
use parley_chats::{AccessControl, ChatResult, NotificationDispatcher, ServerEvent, UnreadCounter};
use parley_config::{AppConfig, GatewayConfig};
use parley_database::{
    ConversationRepository, DatabaseConnection, Message, MessageRepository, MessageStore,
    StoreError, UserRepository,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::warn;

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Outcome of a mark-read request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub conversation_id: String,
    pub reader_id: String,
    pub count: u64,
    pub timestamp: String,
}

impl From<ReadReceipt> for ServerEvent {
    fn from(receipt: ReadReceipt) -> Self {
        ServerEvent::MessagesRead {
            conversation_id: receipt.conversation_id,
            reader_id: receipt.reader_id,
            count: receipt.count,
            timestamp: receipt.timestamp,
        }
    }
}

/// Everything a connection or request handler needs. Cheap to clone.
#[derive(Clone)]
pub struct GatewayState {
    pub authenticator: Authenticator,
    pub access: AccessControl,
    pub store: Arc<dyn MessageStore>,
    pub bus: Bus,
    pub unread: Arc<dyn UnreadCounter>,
    pub dispatcher: NotificationDispatcher,
    pub config: GatewayConfig,
    /// Present when backed by SQLite; the health endpoint pings it.
    pub database: Option<DatabaseConnection>,
}

impl GatewayState {
    /// Wire the SQLite repositories and the JWT verifier around an existing
    /// pool, bus and dispatcher.
    pub fn from_pool(
        pool: SqlitePool,
        config: &AppConfig,
        bus: Bus,
        unread: Arc<dyn UnreadCounter>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        let users = Arc::new(UserRepository::new(pool.clone()));
        let conversations = Arc::new(ConversationRepository::new(pool.clone()));
        let messages = Arc::new(MessageRepository::new(pool.clone()));

        let verifier = Arc::new(JwtVerifier::new(&config.auth));
        let authenticator = Authenticator::new(verifier, users, config.gateway.verifier_timeout());
        let access = AccessControl::new(conversations, config.gateway.store_timeout());

        Self {
            authenticator,
            access,
            store: messages,
            bus,
            unread,
            dispatcher,
            config: config.gateway.clone(),
            database: Some(DatabaseConnection::from_pool(pool)),
        }
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Persist through the store under the store timeout. Membership is
    /// re-checked inside the store transaction.
    pub async fn persist_message(&self, sender_id: &str, conversation_id: &str, content: &str) -> ChatResult<Message> {
        let timeout = self.config.store_timeout();
        let message = tokio::time::timeout(timeout, self.store.persist(sender_id, conversation_id, content))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;
        Ok(message)
    }

    /// History in ascending order, under the store timeout.
    pub async fn list_history(&self, conversation_id: &str, limit: i64) -> ChatResult<Vec<Message>> {
        let timeout = self.config.store_timeout();
        let messages = tokio::time::timeout(timeout, self.store.list_messages(conversation_id, limit))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;
        Ok(messages)
    }

    /// Mark everything the reader did not send as read, reset the unread
    /// counter and broadcast `messages.read` to the conversation.
    pub async fn mark_read(&self, reader_id: &str, conversation_id: &str, origin: Origin) -> ChatResult<ReadReceipt> {
        self.access.ensure_participant(reader_id, conversation_id).await?;

        let timeout = self.config.store_timeout();
        let count = tokio::time::timeout(timeout, self.store.mark_read(conversation_id, reader_id))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;

        let counter_timeout = self.config.bus_timeout();
        match tokio::time::timeout(counter_timeout, self.unread.reset(conversation_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(conversation = %conversation_id, error = %err, "unread counter reset failed"),
            Err(_) => warn!(
                conversation = %conversation_id,
                timeout_ms = counter_timeout.as_millis() as u64,
                "unread counter reset timed out"
            ),
        }

        let receipt = ReadReceipt {
            conversation_id: conversation_id.to_string(),
            reader_id: reader_id.to_string(),
            count,
            timestamp: now(),
        };
        let event = ServerEvent::from(receipt.clone());
        if let Err(err) = self
            .bus
            .publish(&Topic::conversation(conversation_id), Some(origin), event.to_value()?)
            .await
        {
            warn!(conversation = %conversation_id, error = %err, "read receipt broadcast failed");
        }

        Ok(receipt)
    }
}
