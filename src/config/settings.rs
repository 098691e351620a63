//! Application settings.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::{BrowserSettings, SourceConfig};
use crate::harvest::session::HttpSessionSettings;
use crate::harvest::{EscalationPolicy, ServicePolicy, WalkPolicy};

/// Default bind address for the HTTP server.
pub const DEFAULT_BIND: &str = "127.0.0.1:3030";

/// Where persisted state lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// JSON files under the data directory.
    #[default]
    File,
    /// Process memory; lost on exit.
    Memory,
}

/// How pages are fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// reqwest for both modes.
    #[default]
    Http,
    /// reqwest for stealth, a real browser for escalated mode.
    Browser,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "browser" => Ok(TransportKind::Browser),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StoreBackend::File),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    pub store: StoreBackend,
    /// HTTP server bind address.
    pub bind: String,
    pub transport: TransportKind,
    /// Stealth-mode user agent: None, "impersonate" or a literal string.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Spacing between stealth requests in milliseconds.
    pub stealth_delay_ms: u64,
    /// Spacing between escalated requests in milliseconds.
    pub escalated_delay_ms: u64,
    pub source: SourceConfig,
    pub browser: BrowserSettings,
    pub walk: WalkPolicy,
    pub escalation: EscalationPolicy,
    pub service: ServicePolicy,
    /// Cadence of the non-resetting refresh.
    pub refresh_interval: Duration,
    /// Local time of the daily baseline reset.
    pub daily_reset_at: NaiveTime,
}

impl Default for Settings {
    fn default() -> Self {
        // Falls back gracefully: data dir -> home dir -> current dir
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("viewharvest");

        Self {
            data_dir,
            store: StoreBackend::File,
            bind: DEFAULT_BIND.to_string(),
            transport: TransportKind::Http,
            user_agent: Some("impersonate".to_string()),
            request_timeout: 30,
            stealth_delay_ms: 800,
            escalated_delay_ms: 2500,
            source: SourceConfig::default(),
            browser: BrowserSettings::default(),
            walk: WalkPolicy::default(),
            escalation: EscalationPolicy::default(),
            service: ServicePolicy::default(),
            refresh_interval: Duration::from_secs(30 * 60),
            daily_reset_at: NaiveTime::MIN,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Directory holding the file store.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    /// Ensure the data directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        if self.store == StoreBackend::File {
            std::fs::create_dir_all(self.store_dir())?;
        }
        Ok(())
    }

    /// Check settings that have no usable default.
    pub fn validate(&self) -> Result<(), String> {
        if self.source.base_url.trim().is_empty() {
            return Err(
                "source.base_url is not set (config file or VIEWHARVEST_BASE_URL)".to_string(),
            );
        }
        url::Url::parse(&self.source.base_url)
            .map_err(|e| format!("source.base_url is invalid: {}", e))?;
        if self.walk.target_count == 0 {
            return Err("target_count must be at least 1".to_string());
        }
        Ok(())
    }

    /// Session knobs for the HTTP transport.
    pub fn http_session(&self) -> HttpSessionSettings {
        HttpSessionSettings {
            origin: self.source.base_url.clone(),
            timeout: Duration::from_secs(self.request_timeout),
            stealth_delay: Duration::from_millis(self.stealth_delay_ms),
            escalated_delay: Duration::from_millis(self.escalated_delay_ms),
            user_agent: self.user_agent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.bind, DEFAULT_BIND);
        assert_eq!(settings.service.pool_size, 2);
        assert_eq!(settings.walk.stall_threshold, 5);
        assert_eq!(settings.refresh_interval, Duration::from_secs(1800));
        assert_eq!(settings.daily_reset_at, NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        assert!(settings.data_dir.ends_with("viewharvest"));
    }

    #[test]
    fn test_validate_requires_base_url() {
        let mut settings = Settings::with_data_dir(PathBuf::from("/tmp/vh"));
        assert!(settings.validate().is_err());

        settings.source.base_url = "not a url".to_string();
        assert!(settings.validate().is_err());

        settings.source.base_url = "https://example.com".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!("Browser".parse::<TransportKind>(), Ok(TransportKind::Browser));
        assert_eq!("memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }
}
