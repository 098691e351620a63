//! On-demand harvest endpoint.

use axum::{
    extract::{Query, State},
    Json,
};

use super::super::AppState;
use super::types::{ApiError, ViewsParams, ViewsResponse};

/// Harvest `user` and report each item's change since the baseline.
///
/// Falls back to the last stored state, flagged `isCached`, when the live
/// harvest fails.
pub async fn views(
    State(state): State<AppState>,
    Query(params): Query<ViewsParams>,
) -> Result<Json<ViewsResponse>, ApiError> {
    let user = params
        .user
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing 'user' query parameter"))?;

    let report = state
        .service
        .view(user, params.count)
        .await
        .map_err(|e| ApiError::harvest(e, Some(user.trim_start_matches('@'))))?;

    Ok(Json(ViewsResponse::from(report)))
}
