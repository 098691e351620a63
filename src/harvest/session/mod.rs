//! Fetch sessions.
//!
//! A session is one identity talking to the remote source: an HTTP client
//! with its cookie jar, or (with the `browser` feature) a real browser. The
//! escalation controller owns exactly one session at a time and swaps it for
//! an escalated one when the source starts challenging.

#[cfg(feature = "browser")]
mod browser;
mod http;
mod pool;
mod resolver;
mod user_agent;

#[cfg(feature = "browser")]
pub use browser::BrowserSessionFactory;
pub use http::{HttpSessionFactory, HttpSessionSettings};
pub use pool::SessionPool;
pub use resolver::{ChallengeResolver, ManualResolver};
pub use user_agent::{random_user_agent, resolve_user_agent, IMPERSONATE_USER_AGENTS, USER_AGENT};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::FetchError;

/// Fetch mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Cheap and fast: plain client, short pacing.
    Stealth,
    /// Slow and interactive-grade: full browser header profile, long pacing,
    /// optionally a headful browser a human can interact with.
    Escalated,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Stealth => "stealth",
            SessionMode::Escalated => "escalated",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub subject: String,
    pub cursor: String,
    pub url: String,
}

/// What came back from the remote side, before classification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub final_url: String,
    pub content_type: String,
    pub body: String,
    /// Parsed `Retry-After`, if the response carried one.
    pub retry_after: Option<Duration>,
}

impl RawResponse {
    pub fn new(status: u16, content_type: &str, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn is_json_content_type(&self) -> bool {
        let ct = self.content_type.to_ascii_lowercase();
        ct.contains("application/json") || ct.contains("+json")
    }
}

/// A live identity able to fetch pages.
#[async_trait]
pub trait FetchSession: Send {
    fn mode(&self) -> SessionMode;

    async fn fetch(&mut self, target: &FetchTarget) -> Result<RawResponse, FetchError>;

    /// Release resources, persisting the identity for the next session.
    async fn close(&mut self);

    /// Release resources and forget the persisted identity.
    async fn invalidate(&mut self) {
        self.close().await;
    }
}

/// Opens sessions of a given mode.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, mode: SessionMode) -> Result<Box<dyn FetchSession>, FetchError>;

    /// Short transport name for health reporting.
    fn transport(&self) -> &'static str;
}

/// Parse a `Retry-After` header value given in seconds.
///
/// HTTP-date values are not supported and yield `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
