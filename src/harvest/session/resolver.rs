//! Manual challenge resolution.
//!
//! When an escalated session is still challenged the controller parks the
//! harvest until an operator signals that the challenge was solved (for
//! example in the headful browser window), or until the wait times out.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

/// Source of "challenge solved" signals.
#[async_trait]
pub trait ChallengeResolver: Send + Sync {
    /// Wait up to `timeout` for a resolution. Returns true when resolved.
    async fn wait_for_resolution(&self, subject: &str, timeout: Duration) -> bool;
}

/// Resolver driven by an external signal (HTTP endpoint or CLI).
pub struct ManualResolver {
    generation: watch::Sender<u64>,
    waiting: Mutex<BTreeSet<String>>,
}

impl Default for ManualResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualResolver {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            generation,
            waiting: Mutex::new(BTreeSet::new()),
        }
    }

    /// Signal that the pending challenge was solved. Wakes every waiter.
    /// Returns the subjects that were waiting.
    pub fn resolve(&self) -> Vec<String> {
        let waiting = self.waiting();
        self.generation.send_modify(|g| *g += 1);
        info!("Challenge resolution signalled ({} waiting)", waiting.len());
        waiting
    }

    /// Subjects currently parked in a manual wait.
    pub fn waiting(&self) -> Vec<String> {
        self.waiting
            .lock()
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn mark_waiting(&self, subject: &str, waiting: bool) {
        if let Ok(mut set) = self.waiting.lock() {
            if waiting {
                set.insert(subject.to_string());
            } else {
                set.remove(subject);
            }
        }
    }
}

#[async_trait]
impl ChallengeResolver for ManualResolver {
    async fn wait_for_resolution(&self, subject: &str, timeout: Duration) -> bool {
        let mut rx = self.generation.subscribe();

        self.mark_waiting(subject, true);
        warn!(
            "Challenge for {} needs manual resolution (waiting up to {}s)",
            subject,
            timeout.as_secs()
        );

        let resolved = matches!(tokio::time::timeout(timeout, rx.changed()).await, Ok(Ok(())));

        self.mark_waiting(subject, false);
        resolved
    }
}
