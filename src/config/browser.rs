//! Browser transport settings.
//!
//! Always compiled so config files parse the same with or without the
//! `browser` feature.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Run without a window. Escalated sessions default to a visible window
    /// so an operator can solve a challenge by hand.
    pub headless: bool,
    /// Chrome/Chromium binary. Discovered from well-known paths when unset.
    pub executable: Option<PathBuf>,
    /// DevTools endpoint of an already running browser (`ws://` or `http://`).
    pub remote_url: Option<String>,
    /// Extra command-line arguments.
    pub chrome_args: Vec<String>,
    /// CDP request timeout in seconds.
    pub timeout: u64,
    /// Time to let a page settle after navigation, in milliseconds.
    pub settle_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: false,
            executable: None,
            remote_url: None,
            chrome_args: Vec::new(),
            timeout: 60,
            settle_ms: 1500,
        }
    }
}
