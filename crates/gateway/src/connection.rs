//! Per-connection protocol: admission, inbound intents and teardown.
//!
//! Nothing here touches a socket: the WebSocket handler feeds frames in and
//! writes back whatever comes out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parley_bus::{ConnectionId, EnvelopeSender, Origin, Topic};
use parley_chats::{ChatError, ChatResult, ClientIntent, DispatchJob, MessageEvent, ServerEvent};
use parley_database::{normalize_conversation_id, User};
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::state::{now, GatewayState};

/// An admitted connection bound to one conversation.
pub struct Connection {
    pub id: ConnectionId,
    pub user: User,
    pub conversation_id: String,
    topic: Topic,
    joined: AtomicBool,
}

impl Connection {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    fn origin(&self) -> Origin {
        Origin::connection(self.id, &self.user.public_id)
    }
}

#[derive(Clone)]
pub struct ConnectionGateway {
    state: Arc<GatewayState>,
}

impl ConnectionGateway {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// Admit a connection. Each step runs only if the previous one passed;
    /// on success the connection has joined its topic and the returned
    /// event must be the first frame the client sees.
    pub async fn connect(
        &self,
        raw_conversation_id: &str,
        token: Option<&str>,
        outbound: EnvelopeSender,
    ) -> GatewayResult<(Connection, ServerEvent)> {
        let user = self.state.authenticator.authenticate(token).await.map_err(|err| {
            debug!(error = %err, "connection refused during authentication");
            GatewayError::from(err)
        })?;

        let Some(conversation_id) = normalize_conversation_id(raw_conversation_id) else {
            debug!(user = %user.public_id, "connection refused: malformed conversation id");
            return Err(GatewayError::Forbidden("not a participant".into()));
        };

        let allowed = self
            .state
            .access
            .is_participant(&user.public_id, &conversation_id)
            .await
            .map_err(GatewayError::from)?;
        if !allowed {
            info!(
                user = %user.public_id,
                conversation = %conversation_id,
                "connection refused: not a participant"
            );
            return Err(GatewayError::Forbidden("not a participant".into()));
        }

        let connection = Connection {
            id: ConnectionId::new(),
            topic: Topic::conversation(&conversation_id),
            conversation_id,
            user,
            joined: AtomicBool::new(false),
        };

        self.state
            .bus
            .join(&connection.topic, connection.id, &connection.user.public_id, outbound)
            .await;
        connection.joined.store(true, Ordering::Release);

        info!(
            connection = %connection.id,
            user = %connection.user.public_id,
            conversation = %connection.conversation_id,
            "connection established"
        );

        let established = ServerEvent::ConnectionEstablished {
            user_id: connection.user.public_id.clone(),
            conversation_id: connection.conversation_id.clone(),
            timestamp: now(),
        };
        Ok((connection, established))
    }

    /// Handle one inbound text frame. The returned event, if any, goes back
    /// to this connection only.
    pub async fn handle_frame(&self, connection: &Connection, text: &str) -> Option<ServerEvent> {
        let intent = match ClientIntent::parse(text) {
            Ok(intent) => intent,
            Err(rejected) => {
                debug!(connection = %connection.id, error = %rejected.error, "frame rejected");
                return Some(ServerEvent::error(&rejected.error, rejected.temp_id));
            }
        };

        match intent {
            ClientIntent::SendMessage {
                content,
                conversation_id,
                temp_id,
            } => match self
                .send_message(connection, &content, conversation_id.as_deref(), temp_id.clone())
                .await
            {
                Ok(ack) => Some(ack),
                Err(err) => {
                    log_failure(connection, "send", &err);
                    Some(ServerEvent::error(&err, temp_id))
                }
            },
            ClientIntent::MarkRead { conversation_id } => {
                match self.mark_read(connection, conversation_id.as_deref()).await {
                    Ok(event) => Some(event),
                    Err(err) => {
                        log_failure(connection, "mark read", &err);
                        Some(ServerEvent::error(&err, None))
                    }
                }
            }
            ClientIntent::Typing { is_typing } => {
                self.typing(connection, is_typing).await;
                None
            }
            ClientIntent::Ping => Some(ServerEvent::Pong { timestamp: now() }),
        }
    }

    /// Leave the topic. Safe to call any number of times.
    pub async fn disconnect(&self, connection: &Connection) {
        if !connection.joined.swap(false, Ordering::AcqRel) {
            return;
        }

        self.state.bus.leave(&connection.topic, connection.id).await;
        info!(
            connection = %connection.id,
            user = %connection.user.public_id,
            conversation = %connection.conversation_id,
            "connection closed"
        );
    }

    /// A per-frame conversation id is honoured only when it is a well-formed
    /// id; anything else falls back to the bound conversation.
    fn target(&self, connection: &Connection, requested: Option<&str>) -> String {
        requested
            .and_then(normalize_conversation_id)
            .unwrap_or_else(|| connection.conversation_id.clone())
    }

    async fn send_message(
        &self,
        connection: &Connection,
        content: &str,
        requested: Option<&str>,
        temp_id: Option<String>,
    ) -> ChatResult<ServerEvent> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::validation("message content must not be empty"));
        }

        let conversation_id = self.target(connection, requested);
        self.state
            .access
            .ensure_participant(&connection.user.public_id, &conversation_id)
            .await?;

        let message = self
            .state
            .persist_message(&connection.user.public_id, &conversation_id, content)
            .await?;
        let event = ServerEvent::ChatMessage(MessageEvent::from_message(&message, temp_id.clone()));
        let topic = Topic::conversation(&conversation_id);

        match self
            .state
            .bus
            .publish(&topic, Some(connection.origin()), event.to_value()?)
            .await
        {
            Ok(()) => self.bump_unread(&conversation_id).await,
            Err(err) => {
                warn!(
                    connection = %connection.id,
                    conversation = %conversation_id,
                    message = %message.public_id,
                    error = %err,
                    "publish failed after commit, handing off to dispatcher"
                );
                let job = DispatchJob::new(message.clone())
                    .with_origin(connection.origin())
                    .with_temp_id(temp_id.clone());
                if let Err(err) = self.state.dispatcher.dispatch(job).await {
                    error!(
                        conversation = %conversation_id,
                        message = %message.public_id,
                        error = %err,
                        "dispatcher refused message"
                    );
                }
            }
        }

        debug!(
            connection = %connection.id,
            conversation = %conversation_id,
            message = %message.public_id,
            "message sent"
        );
        Ok(ServerEvent::ack(&message, temp_id))
    }

    async fn bump_unread(&self, conversation_id: &str) {
        let timeout = self.state.config.bus_timeout();
        match tokio::time::timeout(timeout, self.state.unread.increment(conversation_id)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(conversation = %conversation_id, error = %err, "unread counter update failed"),
            Err(_) => warn!(conversation = %conversation_id, timeout_ms = timeout.as_millis() as u64, "unread counter update timed out"),
        }
    }

    async fn mark_read(&self, connection: &Connection, requested: Option<&str>) -> ChatResult<ServerEvent> {
        let conversation_id = self.target(connection, requested);
        let receipt = self
            .state
            .mark_read(&connection.user.public_id, &conversation_id, connection.origin())
            .await?;
        Ok(receipt.into())
    }

    async fn typing(&self, connection: &Connection, is_typing: bool) {
        let event = ServerEvent::Typing {
            conversation_id: connection.conversation_id.clone(),
            user_id: connection.user.public_id.clone(),
            is_typing,
        };
        let payload = match event.to_value() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(connection = %connection.id, error = %err, "typing event encoding failed");
                return;
            }
        };

        if let Err(err) = self
            .state
            .bus
            .publish(&connection.topic, Some(connection.origin()), payload)
            .await
        {
            debug!(connection = %connection.id, error = %err, "typing broadcast failed");
        }
    }
}

fn log_failure(connection: &Connection, operation: &str, err: &ChatError) {
    if err.is_transient() {
        warn!(
            connection = %connection.id,
            user = %connection.user.public_id,
            operation,
            code = err.code(),
            error = %err,
            "request failed"
        );
    } else {
        debug!(
            connection = %connection.id,
            user = %connection.user.public_id,
            operation,
            code = err.code(),
            error = %err,
            "request rejected"
        );
    }
}
