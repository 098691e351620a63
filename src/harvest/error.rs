//! Harvest error types.

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Result type for harvest operations.
pub type HarvestResult<T> = Result<T, HarvestError>;

/// Terminal outcome of a harvest that did not produce items.
///
/// Everything recoverable is retried inside the escalation controller; only
/// exhausted policies reach this type.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HarvestError {
    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    #[error("Challenge was not resolved in time")]
    ChallengeUnresolved,

    #[error("Rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Upstream protocol error: {0}")]
    UpstreamProtocolError(String),

    #[error("Harvest returned no items")]
    EmptyResult,

    #[error("Session identity expired")]
    SessionExpired,

    #[error("Network error: {0}")]
    Network(String),

    #[error("A harvest for {0} is already running")]
    Busy(String),

    #[error("Harvest exceeded its {}s deadline", .0.as_secs())]
    DeadlineExceeded(Duration),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<StoreError> for HarvestError {
    fn from(err: StoreError) -> Self {
        HarvestError::Store(err.to_string())
    }
}

/// Failure of a single fetch at the transport level.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Session identity expired")]
    SessionExpired,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

impl From<FetchError> for HarvestError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Network(msg) => HarvestError::Network(msg),
            FetchError::SessionExpired => HarvestError::SessionExpired,
        }
    }
}
