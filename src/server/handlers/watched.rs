//! Watch list endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::super::AppState;
use super::types::ApiError;

pub async fn list_watched(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let subjects = state
        .service
        .watched()
        .await
        .map_err(|e| ApiError::harvest(e, None))?;
    Ok(Json(subjects))
}

/// 201 when newly added, 200 when already watched.
pub async fn add_watched(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let added = state
        .service
        .watch(&username)
        .await
        .map_err(|e| ApiError::harvest(e, Some(&username)))?;
    let status = if added {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(serde_json::json!({ "user": username, "added": added })),
    ))
}

/// Remove a subject and its baselines. 404 when it is not watched.
pub async fn remove_watched(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state
        .service
        .remove(&username)
        .await
        .map_err(|e| ApiError::harvest(e, Some(&username)))?;
    if !removed {
        return Err(ApiError::not_found(
            format!("{} is not on the watch list", username),
            &username,
        ));
    }
    Ok(Json(
        serde_json::json!({ "user": username, "removed": true }),
    ))
}
