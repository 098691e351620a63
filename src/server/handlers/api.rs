//! Health and operator control endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::{info, warn};

use super::super::AppState;
use super::types::{HealthResponse, RefreshParams};

/// Liveness plus transport and watch list size.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (status, watched) = match state.service.watched().await {
        Ok(subjects) => ("ok", subjects.len()),
        Err(e) => {
            warn!("Health check could not read watch list: {}", e);
            ("degraded", 0)
        }
    };
    Json(HealthResponse {
        status,
        transport: state.service.transport(),
        watched,
        pool_size: state.service.policy().pool_size,
        awaiting_challenge: state.resolver.waiting(),
    })
}

/// Start a refresh of every watched subject in the background.
pub async fn refresh(
    State(state): State<AppState>,
    Query(params): Query<RefreshParams>,
) -> impl IntoResponse {
    let service = state.service.clone();
    let reset = params.reset;
    tokio::spawn(async move {
        match service.refresh_all(reset).await {
            Ok(outcomes) => info!(
                "Manual refresh finished: {} subjects (reset={})",
                outcomes.len(),
                reset
            ),
            Err(e) => warn!("Manual refresh failed: {}", e),
        }
    });
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "started", "reset": reset })),
    )
}

/// Signal that a pending challenge was solved by hand.
pub async fn resolve_challenge(State(state): State<AppState>) -> impl IntoResponse {
    let resolved = state.resolver.resolve();
    Json(serde_json::json!({ "resolved": resolved }))
}
