//! Message REST endpoints
//!
//! Writes made here bypass the live send flow, so fan-out and the unread
//! counter are left to the notification dispatcher.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use parley_bus::Origin;
use parley_chats::{ChatError, DispatchJob, MessageEvent};
use parley_database::{normalize_conversation_id, User};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{GatewayError, GatewayResult};
use crate::state::{GatewayState, ReadReceipt};

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub content: Option<String>,
    /// Alias of `content`, as on the socket.
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListMessagesQuery {
    pub limit: Option<i64>,
}

pub fn create_message_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route(
            "/conversations/:conversation_id/messages",
            get(list_messages).post(create_message),
        )
        .route("/conversations/:conversation_id/read", post(mark_read))
}

/// Malformed ids are answered like foreign conversations.
fn parse_conversation_id(raw: &str) -> GatewayResult<String> {
    normalize_conversation_id(raw).ok_or_else(|| GatewayError::Forbidden("not a participant".into()))
}

async fn authorize(state: &GatewayState, user: &User, raw_conversation_id: &str) -> GatewayResult<String> {
    let conversation_id = parse_conversation_id(raw_conversation_id)?;
    state
        .access
        .ensure_participant(&user.public_id, &conversation_id)
        .await?;
    Ok(conversation_id)
}

pub async fn create_message(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<User>,
    Json(body): Json<CreateMessageRequest>,
) -> GatewayResult<(StatusCode, Json<MessageEvent>)> {
    let content = body.content.or(body.message).unwrap_or_default();
    let content = content.trim();
    if content.is_empty() {
        return Err(ChatError::validation("message content must not be empty").into());
    }

    let conversation_id = authorize(&state, &user, &conversation_id).await?;
    let message = state
        .persist_message(&user.public_id, &conversation_id, content)
        .await?;

    info!(
        conversation = %conversation_id,
        user = %user.public_id,
        message = %message.public_id,
        "message created over REST"
    );

    let job = DispatchJob::new(message.clone()).with_origin(Origin::user(&user.public_id));
    if let Err(err) = state.dispatcher.dispatch(job).await {
        error!(
            conversation = %conversation_id,
            message = %message.public_id,
            error = %err,
            "dispatcher refused message"
        );
    }

    Ok((StatusCode::CREATED, Json(MessageEvent::from_message(&message, None))))
}

pub async fn mark_read(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<User>,
) -> GatewayResult<Json<ReadReceipt>> {
    // participation is checked by mark_read itself
    let conversation_id = parse_conversation_id(&conversation_id)?;
    let receipt = state
        .mark_read(&user.public_id, &conversation_id, Origin::user(&user.public_id))
        .await?;
    Ok(Json(receipt))
}

pub async fn list_messages(
    Path(conversation_id): Path<String>,
    Query(params): Query<ListMessagesQuery>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<User>,
) -> GatewayResult<Json<Vec<MessageEvent>>> {
    let conversation_id = authorize(&state, &user, &conversation_id).await?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let messages = state.list_history(&conversation_id, limit).await?;

    Ok(Json(
        messages
            .iter()
            .map(|message| MessageEvent::from_message(message, None))
            .collect(),
    ))
}
