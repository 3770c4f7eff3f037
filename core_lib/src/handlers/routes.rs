//! Route table and the status endpoints

use crate::{error::Result, AppState};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tracing::debug;

use super::health::{handle_component_health, handle_discovery, handle_health};

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(handle_status))
        .route("/ping", get(handle_ping))
        .route("/actuator", get(handle_discovery))
        .route("/actuator/health", get(handle_health))
        .route("/actuator/health/*component", get(handle_component_health))
}

async fn handle_status(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let info = state.status.get().await?;
    debug!("GET /status - {} services", info.services.as_ref().map_or(0, |s| s.len()));
    Ok(Json(info))
}

async fn handle_ping() -> &'static str {
    "pong"
}
