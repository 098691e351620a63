//! Idle session cache shared across harvests.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use super::{FetchSession, SessionFactory, SessionMode};
use crate::harvest::error::FetchError;

/// Keeps a bounded number of idle sessions per mode so consecutive harvests
/// reuse warmed-up identities instead of paying the open cost every time.
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    idle: Mutex<HashMap<SessionMode, Vec<Box<dyn FetchSession>>>>,
    max_idle_per_mode: usize,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, max_idle_per_mode: usize) -> Self {
        Self {
            factory,
            idle: Mutex::new(HashMap::new()),
            max_idle_per_mode,
        }
    }

    pub fn transport(&self) -> &'static str {
        self.factory.transport()
    }

    /// Take an idle session of `mode`, or open a new one.
    pub async fn checkout(&self, mode: SessionMode) -> Result<Box<dyn FetchSession>, FetchError> {
        let cached = {
            let mut idle = self.idle.lock().await;
            idle.get_mut(&mode).and_then(|sessions| sessions.pop())
        };

        match cached {
            Some(session) => {
                debug!("Reusing idle {} session", mode);
                Ok(session)
            }
            None => {
                debug!("Opening new {} session", mode);
                self.factory.open(mode).await
            }
        }
    }

    /// Return a healthy session for reuse.
    pub async fn checkin(&self, mut session: Box<dyn FetchSession>) {
        let mode = session.mode();
        {
            let mut idle = self.idle.lock().await;
            let sessions = idle.entry(mode).or_default();
            if sessions.len() < self.max_idle_per_mode {
                sessions.push(session);
                return;
            }
        }
        session.close().await;
    }

    /// Number of idle sessions of `mode`.
    pub async fn idle_count(&self, mode: SessionMode) -> usize {
        self.idle.lock().await.get(&mode).map_or(0, Vec::len)
    }

    /// Close every idle session.
    pub async fn close_all(&self) {
        let drained: Vec<Box<dyn FetchSession>> = {
            let mut idle = self.idle.lock().await;
            idle.drain().flat_map(|(_, sessions)| sessions).collect()
        };
        for mut session in drained {
            session.close().await;
        }
    }
}
