use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::state::GatewayState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub bus: String,
    pub timestamp: String,
}

/// Reports 503 when the database does not answer.
pub async fn health_check(State(state): State<Arc<GatewayState>>) -> (StatusCode, Json<HealthResponse>) {
    let database = match &state.database {
        Some(database) => match sqlx::query("SELECT 1").execute(database.pool()).await {
            Ok(_) => "ok",
            Err(err) => {
                warn!(error = %err, "health check: database unreachable");
                "unreachable"
            }
        },
        None => "not configured",
    };

    let healthy = database != "unreachable";
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            database: database.to_string(),
            bus: state.bus.backend_name().to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }),
    )
}
