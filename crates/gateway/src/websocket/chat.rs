//! Conversation WebSocket handler

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use parley_bus::EnvelopeReceiver;
use parley_chats::{ChatError, ServerEvent};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionGateway};
use crate::error::{close_code, GatewayError};
use crate::state::GatewayState;

#[derive(Debug, Default, Deserialize)]
pub struct ChatSocketQuery {
    pub token: Option<String>,
    /// Accepted for client compatibility; identity comes from the token only.
    pub user_id: Option<String>,
}

/// `GET /ws/chat/:conversation_id`
///
/// The upgrade always succeeds; a refused connection is closed with a
/// specific close code before any event is sent.
pub async fn chat_websocket_handler(
    ws: WebSocketUpgrade,
    Path(conversation_id): Path<String>,
    Query(query): Query<ChatSocketQuery>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let gateway = ConnectionGateway::new(state);
    ws.on_upgrade(move |socket| handle_chat_websocket(socket, gateway, conversation_id, query))
}

type SocketSink = SplitSink<WebSocket, Message>;

async fn send_event(sink: &mut SocketSink, event: &ServerEvent) -> bool {
    match event.to_text() {
        Ok(text) => sink.send(Message::Text(text)).await.is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to encode server event");
            true
        }
    }
}

async fn close(sink: &mut SocketSink, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    };
    if let Err(err) = sink.send(Message::Close(Some(frame))).await {
        debug!(code, error = %err, "close frame not delivered");
    }
}

async fn handle_chat_websocket(
    socket: WebSocket,
    gateway: ConnectionGateway,
    conversation_id: String,
    query: ChatSocketQuery,
) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(gateway.state().config.outbound_buffer.max(1));

    let (connection, established) = match gateway
        .connect(&conversation_id, query.token.as_deref(), outbound_tx)
        .await
    {
        Ok(admitted) => admitted,
        Err(err) => {
            refuse(&mut sink, &err).await;
            return;
        }
    };

    if send_event(&mut sink, &established).await {
        run(&gateway, &connection, &mut sink, &mut stream, &mut outbound_rx).await;
    }

    gateway.disconnect(&connection).await;
}

async fn refuse(sink: &mut SocketSink, err: &GatewayError) {
    if err.close_code() == close_code::INTERNAL_ERROR {
        warn!(error = %err, "connection refused");
    } else {
        debug!(error = %err, code = err.close_code(), "connection refused");
    }
    close(sink, err.close_code(), err.close_reason()).await;
}

async fn run(
    gateway: &ConnectionGateway,
    connection: &Connection,
    sink: &mut SocketSink,
    stream: &mut SplitStream<WebSocket>,
    outbound: &mut EnvelopeReceiver,
) {
    loop {
        tokio::select! {
            frame = stream.next() => {
                let Some(Ok(frame)) = frame else {
                    break;
                };

                match frame {
                    Message::Text(text) => {
                        if let Some(reply) = gateway.handle_frame(connection, &text).await {
                            if !send_event(sink, &reply).await {
                                break;
                            }
                        }
                    }
                    Message::Binary(_) => {
                        let err = ChatError::invalid_frame("binary frames are not supported");
                        let reply = ServerEvent::error(&err, None);
                        if !send_event(sink, &reply).await {
                            break;
                        }
                    }
                    // the protocol layer answers pings and completes the close handshake
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            envelope = outbound.recv() => {
                let Some(envelope) = envelope else {
                    close(sink, close_code::NORMAL, "going away").await;
                    break;
                };
                let Ok(text) = serde_json::to_string(&envelope.payload) else {
                    continue;
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }
}
