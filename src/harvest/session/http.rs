//! reqwest-backed fetch sessions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use super::{
    parse_retry_after, resolve_user_agent, FetchSession, FetchTarget, RawResponse,
    SessionFactory, SessionMode,
};
use crate::harvest::error::FetchError;
use crate::store::{IdentitySnapshot, IdentityStore};

/// Knobs for HTTP sessions.
#[derive(Debug, Clone)]
pub struct HttpSessionSettings {
    /// Origin cookies are scoped to; also used as Referer in escalated mode.
    pub origin: String,
    pub timeout: Duration,
    /// Minimum spacing between requests in stealth mode.
    pub stealth_delay: Duration,
    /// Minimum spacing between requests in escalated mode.
    pub escalated_delay: Duration,
    /// User agent config for stealth mode (see [`resolve_user_agent`]).
    pub user_agent: Option<String>,
}

impl Default for HttpSessionSettings {
    fn default() -> Self {
        Self {
            origin: String::new(),
            timeout: Duration::from_secs(30),
            stealth_delay: Duration::from_millis(800),
            escalated_delay: Duration::from_millis(2500),
            user_agent: Some("impersonate".to_string()),
        }
    }
}

/// Opens [`HttpSession`]s, restoring persisted cookies per mode.
pub struct HttpSessionFactory {
    settings: HttpSessionSettings,
    identities: Option<IdentityStore>,
}

impl HttpSessionFactory {
    pub fn new(settings: HttpSessionSettings) -> Self {
        Self {
            settings,
            identities: None,
        }
    }

    /// Persist and restore cookies through the identity store.
    pub fn with_identity_store(mut self, identities: IdentityStore) -> Self {
        self.identities = Some(identities);
        self
    }

    fn headers_for(&self, mode: SessionMode) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );

        if mode == SessionMode::Escalated {
            if let Ok(referer) = HeaderValue::from_str(&format!(
                "{}/",
                self.settings.origin.trim_end_matches('/')
            )) {
                headers.insert(header::REFERER, referer);
            }
            headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
            headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
            headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }
        headers
    }

    async fn restore_identity(&self, mode: SessionMode, jar: &Jar, origin: &Url) -> Option<String> {
        let identities = self.identities.as_ref()?;
        let snapshot = match identities.load(mode.as_str()).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to load {} identity: {}", mode, e);
                return None;
            }
        };

        for cookie in &snapshot.cookies {
            jar.add_cookie_str(&format!("{}; Path=/", cookie), origin);
        }
        debug!(
            "Restored {} cookies for {} session",
            snapshot.cookies.len(),
            mode
        );
        snapshot.user_agent
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self, mode: SessionMode) -> Result<Box<dyn FetchSession>, FetchError> {
        let origin = Url::parse(&self.settings.origin)
            .map_err(|e| FetchError::Network(format!("invalid origin: {}", e)))?;

        let jar = Arc::new(Jar::default());
        let restored_agent = self.restore_identity(mode, &jar, &origin).await;

        // An identity is tied to the agent it was issued to.
        let user_agent = restored_agent.unwrap_or_else(|| match mode {
            SessionMode::Stealth => resolve_user_agent(self.settings.user_agent.as_deref()),
            SessionMode::Escalated => resolve_user_agent(Some("impersonate")),
        });

        let client = Client::builder()
            .user_agent(&user_agent)
            .default_headers(self.headers_for(mode))
            .cookie_provider(jar.clone())
            .timeout(self.settings.timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        let delay = match mode {
            SessionMode::Stealth => self.settings.stealth_delay,
            SessionMode::Escalated => self.settings.escalated_delay,
        };

        Ok(Box::new(HttpSession {
            mode,
            client,
            jar,
            origin,
            user_agent,
            delay,
            last_request: None,
            identities: self.identities.clone(),
        }))
    }

    fn transport(&self) -> &'static str {
        "http"
    }
}

/// One cookie-jar identity over reqwest.
pub struct HttpSession {
    mode: SessionMode,
    client: Client,
    jar: Arc<Jar>,
    origin: Url,
    user_agent: String,
    delay: Duration,
    last_request: Option<Instant>,
    identities: Option<IdentityStore>,
}

impl HttpSession {
    fn time_until_ready(&self) -> Duration {
        match self.last_request {
            Some(last) => self.delay.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    fn snapshot(&self) -> Option<IdentitySnapshot> {
        let header = self.jar.cookies(&self.origin)?;
        let header = header.to_str().ok()?;
        let mut snapshot = IdentitySnapshot::from_cookie_header(self.origin.as_str(), header);
        snapshot.user_agent = Some(self.user_agent.clone());
        snapshot.saved_at = Some(Utc::now());
        Some(snapshot)
    }
}

#[async_trait]
impl FetchSession for HttpSession {
    fn mode(&self) -> SessionMode {
        self.mode
    }

    async fn fetch(&mut self, target: &FetchTarget) -> Result<RawResponse, FetchError> {
        let wait = self.time_until_ready();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        self.last_request = Some(Instant::now());

        debug!("GET {} ({} session)", target.url, self.mode);
        let response = self.client.get(&target.url).send().await?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await?;

        if status == 401 {
            return Err(FetchError::SessionExpired);
        }

        Ok(RawResponse {
            status,
            final_url,
            content_type,
            body,
            retry_after,
        })
    }

    async fn close(&mut self) {
        let (Some(identities), Some(snapshot)) = (&self.identities, self.snapshot()) else {
            return;
        };
        if let Err(e) = identities.save(self.mode.as_str(), &snapshot).await {
            warn!("Failed to persist {} identity: {}", self.mode, e);
        }
    }

    async fn invalidate(&mut self) {
        let Some(identities) = &self.identities else {
            return;
        };
        if let Err(e) = identities.clear(self.mode.as_str()).await {
            warn!("Failed to clear {} identity: {}", self.mode, e);
        }
    }
}
