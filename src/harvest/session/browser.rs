//! Headful browser sessions for escalated mode (`browser` feature).
//!
//! Stealth sessions stay on plain HTTP; only escalation pays for a browser.
//! No fingerprint masking is applied: the browser is an ordinary Chrome
//! window an operator can use to clear a challenge.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::{Browser, BrowserConfig, Page};
use chrono::Utc;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{FetchSession, FetchTarget, HttpSessionFactory, RawResponse, SessionFactory, SessionMode};
use crate::config::{BrowserSettings, PayloadFormat};
use crate::harvest::error::FetchError;
use crate::store::{IdentitySnapshot, IdentityStore};

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

fn find_chrome(configured: Option<&PathBuf>) -> Result<PathBuf, FetchError> {
    if let Some(path) = configured {
        return Ok(path.clone());
    }
    CHROME_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| FetchError::Network("Chrome/Chromium not found".to_string()))
}

fn cdp_error(e: impl std::fmt::Display) -> FetchError {
    FetchError::Network(e.to_string())
}

/// CDP cookie parameters for a saved identity, scoped to its origin.
fn cookie_params(snapshot: &IdentitySnapshot) -> Vec<CookieParam> {
    snapshot
        .cookies
        .iter()
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            match CookieParam::builder()
                .name(name)
                .value(value.trim())
                .url(snapshot.origin.as_str())
                .build()
            {
                Ok(param) => Some(param),
                Err(e) => {
                    warn!("Failed to build cookie {}: {}", name, e);
                    None
                }
            }
        })
        .collect()
}

/// Stealth over HTTP, escalated over a real browser.
pub struct BrowserSessionFactory {
    settings: BrowserSettings,
    format: PayloadFormat,
    origin: String,
    stealth: HttpSessionFactory,
    identities: Option<IdentityStore>,
}

impl BrowserSessionFactory {
    pub fn new(
        settings: BrowserSettings,
        format: PayloadFormat,
        origin: String,
        stealth: HttpSessionFactory,
    ) -> Self {
        Self {
            settings,
            format,
            origin,
            stealth,
            identities: None,
        }
    }

    pub fn with_identity_store(mut self, identities: IdentityStore) -> Self {
        self.identities = Some(identities);
        self
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>), FetchError> {
        let (browser, mut handler) = match &self.settings.remote_url {
            Some(url) => {
                info!("Connecting to remote browser at {}", url);
                Browser::connect(url.clone()).await.map_err(cdp_error)?
            }
            None => {
                let chrome = find_chrome(self.settings.executable.as_ref())?;
                info!("Launching browser (headless={})", self.settings.headless);

                let mut builder = BrowserConfig::builder()
                    .chrome_executable(chrome)
                    .request_timeout(Duration::from_secs(self.settings.timeout));
                if !self.settings.headless {
                    builder = builder.with_head();
                }
                builder = builder
                    .arg("--no-first-run")
                    .arg("--no-default-browser-check");
                for arg in &self.settings.chrome_args {
                    builder = builder.arg(arg);
                }
                let config = builder.build().map_err(FetchError::Network)?;
                Browser::launch(config).await.map_err(cdp_error)?
            }
        };

        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok((browser, handle))
    }

    /// Load the escalated identity saved by an earlier browser, so a
    /// challenge cleared by hand carries over to new sessions.
    async fn restore_identity(&self, browser: &Browser) {
        let Some(identities) = &self.identities else {
            return;
        };
        let snapshot = match identities.load(SessionMode::Escalated.as_str()).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to load browser identity: {}", e);
                return;
            }
        };
        if snapshot.origin != self.origin {
            debug!("Skipping identity saved for {}", snapshot.origin);
            return;
        }

        let params = cookie_params(&snapshot);
        let count = params.len();
        if count == 0 {
            return;
        }
        match browser.set_cookies(params).await {
            Ok(_) => debug!("Restored {} cookies into browser session", count),
            Err(e) => warn!("Failed to restore browser cookies: {}", e),
        }
    }
}

#[async_trait]
impl SessionFactory for BrowserSessionFactory {
    async fn open(&self, mode: SessionMode) -> Result<Box<dyn FetchSession>, FetchError> {
        if mode == SessionMode::Stealth {
            return self.stealth.open(mode).await;
        }

        let (browser, handler) = self.launch().await?;
        self.restore_identity(&browser).await;
        Ok(Box::new(BrowserSession {
            browser: Some(browser),
            handler,
            format: self.format,
            origin: self.origin.clone(),
            settle: Duration::from_millis(self.settings.settle_ms),
            identities: self.identities.clone(),
        }))
    }

    fn transport(&self) -> &'static str {
        "browser"
    }
}

/// One browser process driven over CDP.
pub struct BrowserSession {
    browser: Option<Browser>,
    handler: JoinHandle<()>,
    format: PayloadFormat,
    origin: String,
    settle: Duration,
    identities: Option<IdentityStore>,
}

impl BrowserSession {
    async fn read_page(&self, page: &Page, target: &FetchTarget) -> Result<RawResponse, FetchError> {
        page.wait_for_navigation().await.map_err(cdp_error)?;
        tokio::time::sleep(self.settle).await;

        // JSON endpoints render inside a <pre>; innerText gives the raw body.
        let (body, content_type) = match self.format {
            PayloadFormat::Json => {
                let text: String = page
                    .evaluate("document.body ? document.body.innerText : ''")
                    .await
                    .map_err(cdp_error)?
                    .into_value()
                    .map_err(cdp_error)?;
                let ct = if text.trim_start().starts_with(['{', '[']) {
                    "application/json"
                } else {
                    "text/html"
                };
                (text, ct)
            }
            PayloadFormat::Html => (page.content().await.map_err(cdp_error)?, "text/html"),
        };

        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| target.url.clone());

        Ok(RawResponse {
            status: 200,
            final_url,
            content_type: content_type.to_string(),
            body,
            retry_after: None,
        })
    }

    async fn shutdown(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("Browser close failed: {}", e);
            }
            let _ = browser.wait().await;
        }
        self.handler.abort();
    }
}

#[async_trait]
impl FetchSession for BrowserSession {
    fn mode(&self) -> SessionMode {
        SessionMode::Escalated
    }

    async fn fetch(&mut self, target: &FetchTarget) -> Result<RawResponse, FetchError> {
        let browser = self.browser.as_ref().ok_or(FetchError::SessionExpired)?;

        debug!("Navigating to {}", target.url);
        let page = browser.new_page(target.url.as_str()).await.map_err(cdp_error)?;
        let result = self.read_page(&page, target).await;

        // The tab is closed whether or not the read succeeded.
        if let Err(e) = page.close().await {
            debug!("Page close failed: {}", e);
        }
        result
    }

    async fn close(&mut self) {
        if let (Some(identities), Some(browser)) = (&self.identities, &self.browser) {
            match browser.get_cookies().await {
                Ok(cookies) => {
                    let snapshot = IdentitySnapshot {
                        origin: self.origin.clone(),
                        cookies: cookies
                            .iter()
                            .map(|c| format!("{}={}", c.name, c.value))
                            .collect(),
                        user_agent: browser.user_agent().await.ok(),
                        saved_at: Some(Utc::now()),
                    };
                    if let Err(e) = identities
                        .save(SessionMode::Escalated.as_str(), &snapshot)
                        .await
                    {
                        warn!("Failed to persist browser identity: {}", e);
                    }
                }
                Err(e) => warn!("Failed to read browser cookies: {}", e),
            }
        }
        self.shutdown().await;
    }

    async fn invalidate(&mut self) {
        if let Some(identities) = &self.identities {
            if let Err(e) = identities.clear(SessionMode::Escalated.as_str()).await {
                warn!("Failed to clear browser identity: {}", e);
            }
        }
        self.shutdown().await;
    }
}
