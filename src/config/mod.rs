//! Configuration management for viewharvest using the prefer crate.
//!
//! [`Settings`] holds the effective values. A [`Config`] file, discovered by
//! prefer or passed explicitly, overrides defaults; a handful of
//! `VIEWHARVEST_*` environment variables override the file.

pub mod browser;
mod settings;
pub mod source;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

pub use browser::BrowserSettings;
pub use settings::{Settings, StoreBackend, TransportKind, DEFAULT_BIND};
pub use source::{HtmlExtraction, PayloadFormat, SourceConfig};

use crate::harvest::BusyPolicy;

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Store backend ("file" or "memory").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreBackend>,
    /// HTTP server bind address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    /// Fetch transport ("http" or "browser").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,
    /// User agent: "impersonate", "none" or a literal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stealth_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_delay_ms: Option<u64>,
    /// Concurrent harvests allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,
    /// "queue" or "reject" when the pool is saturated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_policy: Option<BusyPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stall_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// Wall-clock cap on a single harvest, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harvest_deadline_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_base_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_cap_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malformed_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_retries: Option<u32>,
    /// How long to wait for an operator to clear a challenge, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_wait_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_waits: Option<u32>,
    /// Minutes between non-resetting refreshes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_mins: Option<u64>,
    /// Local time of the daily reset, "HH:MM".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_reset_at: Option<String>,
    /// Upstream source description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceConfig>,
    /// Browser transport settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserSettings>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers viewharvest config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("viewharvest").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring config {}: {}", path.display(), e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path (TOML or JSON by extension).
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory of the config file, if it was loaded from one.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// A leading `~` expands to the home directory.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let path = match path_str.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(path_str)),
            None => PathBuf::from(path_str),
        };

        if path.is_absolute() {
            path
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    /// `base_dir` is used to resolve relative paths.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) -> Result<(), String> {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(store) = self.store {
            settings.store = store;
        }
        if let Some(ref bind) = self.bind {
            settings.bind = bind.clone();
        }
        if let Some(transport) = self.transport {
            settings.transport = transport;
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = match user_agent.as_str() {
                "" | "none" => None,
                other => Some(other.to_string()),
            };
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(delay) = self.stealth_delay_ms {
            settings.stealth_delay_ms = delay;
        }
        if let Some(delay) = self.escalated_delay_ms {
            settings.escalated_delay_ms = delay;
        }

        if let Some(size) = self.pool_size {
            settings.service.pool_size = size.max(1);
        }
        if let Some(busy) = self.busy_policy {
            settings.service.busy = busy;
        }
        if let Some(secs) = self.harvest_deadline_secs {
            settings.service.deadline = Duration::from_secs(secs);
        }

        if let Some(count) = self.target_count {
            settings.walk.target_count = count;
        }
        if let Some(threshold) = self.stall_threshold {
            settings.walk.stall_threshold = threshold;
        }
        if let Some(max) = self.max_iterations {
            settings.walk.max_iterations = max;
        }

        let escalation = &mut settings.escalation;
        if let Some(attempts) = self.rate_limit_attempts {
            escalation.rate_limit_attempts = attempts;
        }
        if let Some(ms) = self.backoff_base_ms {
            escalation.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = self.backoff_cap_ms {
            escalation.backoff_cap = Duration::from_millis(ms);
        }
        if let Some(n) = self.malformed_retries {
            escalation.malformed_retries = n;
        }
        if let Some(n) = self.network_retries {
            escalation.network_retries = n;
        }
        if let Some(secs) = self.manual_wait_secs {
            escalation.manual_wait_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = self.manual_waits {
            escalation.manual_waits = n;
        }

        if let Some(mins) = self.refresh_interval_mins {
            settings.refresh_interval = Duration::from_secs(mins.max(1) * 60);
        }
        if let Some(ref at) = self.daily_reset_at {
            settings.daily_reset_at = parse_time_of_day(at)?;
        }
        if let Some(ref source) = self.source {
            settings.source = source.clone();
        }
        if let Some(ref browser) = self.browser {
            settings.browser = browser.clone();
        }
        Ok(())
    }
}

/// Parse "HH:MM" or "HH:MM:SS".
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, String> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| format!("invalid time of day '{}', expected HH:MM", value))
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (--config). Skips discovery.
    pub config_path: Option<PathBuf>,
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

/// Apply `VIEWHARVEST_*` environment overrides.
fn apply_env_overrides(settings: &mut Settings) -> anyhow::Result<()> {
    if let Some(dir) = env_override("VIEWHARVEST_DATA_DIR") {
        tracing::debug!("Using VIEWHARVEST_DATA_DIR from environment: {}", dir);
        settings.data_dir = PathBuf::from(dir);
    }
    if let Some(bind) = env_override("VIEWHARVEST_BIND") {
        settings.bind = bind;
    }
    if let Some(base_url) = env_override("VIEWHARVEST_BASE_URL") {
        settings.source.base_url = base_url;
    }
    if let Some(transport) = env_override("VIEWHARVEST_TRANSPORT") {
        settings.transport = transport.parse().map_err(anyhow::Error::msg)?;
    }
    if let Some(store) = env_override("VIEWHARVEST_STORE") {
        settings.store = store.parse().map_err(anyhow::Error::msg)?;
    }
    if let Some(size) = env_override("VIEWHARVEST_POOL_SIZE") {
        let size: usize = size
            .parse()
            .map_err(|e| anyhow::anyhow!("VIEWHARVEST_POOL_SIZE: {}", e))?;
        settings.service.pool_size = size.max(1);
    }
    Ok(())
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings(options: LoadOptions) -> anyhow::Result<(Settings, Config)> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path)
            .await
            .map_err(anyhow::Error::msg)?,
        None => Config::load().await,
    };

    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut settings = Settings::default();
    config
        .apply_to_settings(&mut settings, &base_dir)
        .map_err(anyhow::Error::msg)?;
    apply_env_overrides(&mut settings)?;

    Ok((settings, config))
}
