//! Request and response bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::harvest::{HarvestError, HarvestReport};
use crate::models::ItemWithChange;

/// Query parameters for `GET /views`.
#[derive(Debug, Deserialize)]
pub struct ViewsParams {
    pub user: Option<String>,
    pub count: Option<usize>,
}

/// Query parameters for `POST /refresh`.
#[derive(Debug, Deserialize)]
pub struct RefreshParams {
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewsResponse {
    pub user: String,
    pub total_videos: usize,
    /// ISO-8601.
    pub scraped_at: String,
    pub videos: Vec<ItemWithChange>,
    pub is_cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<HarvestReport> for ViewsResponse {
    fn from(report: HarvestReport) -> Self {
        Self {
            user: report.subject,
            total_videos: report.items.len(),
            scraped_at: report.scraped_at.to_rfc3339(),
            videos: report.items,
            is_cached: report.cached,
            error: report.error.map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub transport: &'static str,
    pub watched: usize,
    pub pool_size: usize,
    /// Subjects parked until a challenge is solved.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub awaiting_challenge: Vec<String>,
}

/// JSON error body with a status derived from the failure.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub user: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            user: None,
        }
    }

    pub fn not_found(message: impl Into<String>, user: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            user: Some(user.to_string()),
        }
    }

    /// Map a harvest failure, attributing it to `user`.
    pub fn harvest(err: HarvestError, user: Option<&str>) -> Self {
        Self {
            status: status_for(&err),
            message: err.to_string(),
            user: user.map(str::to_string),
        }
    }
}

pub fn status_for(err: &HarvestError) -> StatusCode {
    match err {
        HarvestError::SubjectNotFound(_) => StatusCode::NOT_FOUND,
        HarvestError::Busy(_) => StatusCode::CONFLICT,
        HarvestError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        HarvestError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        HarvestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.message,
            user: self.user.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}
