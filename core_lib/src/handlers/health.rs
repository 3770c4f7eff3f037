//! Actuator health probe handlers

use crate::{
    actuator::{self, HealthResponse},
    error::{AppError, Result},
    AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::{info, warn};

pub async fn handle_discovery() -> impl IntoResponse {
    Json(actuator::discovery())
}

pub async fn handle_health(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let info = state.status.get().await?;
    let health = HealthResponse::from_info(&info);

    let status_code = if health.is_up() {
        StatusCode::OK
    } else {
        warn!("health probe is DOWN");
        StatusCode::SERVICE_UNAVAILABLE
    };

    Ok((status_code, Json(health)))
}

pub async fn handle_component_health(
    State(state): State<AppState>,
    Path(component): Path<String>,
) -> Result<impl IntoResponse> {
    info!("GET /actuator/health/{} - Checking specific component", component);

    let info = state.status.get().await?;
    let mut health = HealthResponse::from_info(&info);

    match health.components.remove(&component) {
        Some(component) => Ok(Json(component)),
        None => Err(AppError::NotFound(format!("Component '{}' not found", component))),
    }
}
