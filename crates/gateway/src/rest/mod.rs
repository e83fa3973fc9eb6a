//! REST API endpoints for the gateway

pub mod health;
pub mod messages;

use axum::{middleware as axum_middleware, routing::get, Router};
use std::sync::Arc;

use crate::middleware::auth_middleware;
use crate::state::GatewayState;

/// `/health` is public; everything under `/api` requires a bearer token.
pub fn create_rest_routes(state: Arc<GatewayState>) -> Router<Arc<GatewayState>> {
    let api = messages::create_message_routes()
        .route_layer(axum_middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api)
}

pub use health::HealthResponse;
pub use messages::{CreateMessageRequest, ListMessagesQuery};
