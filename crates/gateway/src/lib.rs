//! # Parley Gateway Crate
//!
//! The edge of the messaging core: WebSocket connections bound to a single
//! conversation, plus a small REST surface for writes, read receipts, history
//! and health.
//!
//! ## Architecture
//!
//! - **Connection**: the per-connection protocol (admission, intents, teardown)
//! - **WebSocket**: socket plumbing around [`ConnectionGateway`]
//! - **REST**: bearer-authenticated HTTP endpoints
//! - **State**: shared services handed to every handler
//!
//! ## Usage
//!
//! ```rust,ignore
//! use parley_gateway::{create_router, GatewayState};
//!
//! let state = GatewayState::from_pool(pool, &config, bus, unread, dispatcher).into_shared();
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, create_router(state)).await?;
//! ```

pub mod connection;
pub mod error;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod websocket;

pub use connection::{Connection, ConnectionGateway};
pub use error::{close_code, GatewayError, GatewayResult};
pub use middleware::auth_middleware;
pub use state::{GatewayState, ReadReceipt};

use axum::{http::Method, middleware as axum_middleware, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Create the main application router with all routes
pub fn create_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .merge(rest::create_rest_routes(state.clone()))
        .merge(websocket::create_websocket_routes())
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(Any),
        )
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
}
