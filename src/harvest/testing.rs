//! Scripted sessions and canned responses for harvest tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::error::FetchError;
use super::escalation::EscalationPolicy;
use super::session::{
    ChallengeResolver, FetchSession, FetchTarget, RawResponse, SessionFactory, SessionMode,
};
use crate::config::SourceConfig;

type Responder = dyn Fn(SessionMode, &FetchTarget) -> Result<RawResponse, FetchError> + Send + Sync;

/// What the scripted sessions did, for assertions.
#[derive(Debug, Default)]
pub struct SessionLog {
    pub opened: Vec<SessionMode>,
    pub fetches: Vec<(SessionMode, String)>,
    pub closed: usize,
    pub invalidated: usize,
}

/// Session factory whose sessions answer from a closure.
pub struct ScriptedFactory {
    responder: Arc<Responder>,
    log: Arc<Mutex<SessionLog>>,
}

impl ScriptedFactory {
    pub fn new(
        responder: impl Fn(SessionMode, &FetchTarget) -> Result<RawResponse, FetchError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Arc::new(responder),
            log: Arc::new(Mutex::new(SessionLog::default())),
        })
    }

    /// Answer fetches in order, failing once the script runs out.
    pub fn queue(steps: Vec<Result<RawResponse, FetchError>>) -> Arc<Self> {
        let steps = Mutex::new(VecDeque::from(steps));
        Self::new(move |_, _| {
            steps
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Network("script exhausted".to_string())))
        })
    }

    pub fn opened(&self) -> Vec<SessionMode> {
        self.log.lock().unwrap().opened.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.log.lock().unwrap().fetches.len()
    }

    pub fn fetched_cursors(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .fetches
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn invalidated(&self) -> usize {
        self.log.lock().unwrap().invalidated
    }

    pub fn closed(&self) -> usize {
        self.log.lock().unwrap().closed
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self, mode: SessionMode) -> Result<Box<dyn FetchSession>, FetchError> {
        self.log.lock().unwrap().opened.push(mode);
        Ok(Box::new(ScriptedSession {
            mode,
            responder: self.responder.clone(),
            log: self.log.clone(),
        }))
    }

    fn transport(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedSession {
    mode: SessionMode,
    responder: Arc<Responder>,
    log: Arc<Mutex<SessionLog>>,
}

#[async_trait]
impl FetchSession for ScriptedSession {
    fn mode(&self) -> SessionMode {
        self.mode
    }

    async fn fetch(&mut self, target: &FetchTarget) -> Result<RawResponse, FetchError> {
        self.log
            .lock()
            .unwrap()
            .fetches
            .push((self.mode, target.cursor.clone()));
        (self.responder)(self.mode, target)
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().closed += 1;
    }

    async fn invalidate(&mut self) {
        self.log.lock().unwrap().invalidated += 1;
    }
}

/// Resolver that answers immediately.
pub struct InstantResolver {
    resolves: bool,
    calls: AtomicU32,
}

impl InstantResolver {
    pub fn new(resolves: bool) -> Arc<Self> {
        Arc::new(Self {
            resolves,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeResolver for InstantResolver {
    async fn wait_for_resolution(&self, _subject: &str, _timeout: Duration) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.resolves
    }
}

pub fn source() -> SourceConfig {
    SourceConfig {
        base_url: "https://example.com".to_string(),
        ..Default::default()
    }
}

pub fn fast_policy() -> EscalationPolicy {
    EscalationPolicy {
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(5),
        manual_wait_timeout: Duration::from_millis(20),
        ..Default::default()
    }
}

pub fn raw_item(id: &str, views: u64, create_time: i64) -> Value {
    json!({"id": id, "createTime": create_time, "stats": {"playCount": views}})
}

pub fn page(items: Vec<Value>, cursor: Option<&str>, has_more: bool) -> RawResponse {
    let body = json!({
        "statusCode": 0,
        "itemList": items,
        "cursor": cursor,
        "hasMore": has_more,
    });
    RawResponse::new(200, "application/json", body.to_string())
}

pub fn challenge() -> RawResponse {
    RawResponse::new(
        200,
        "text/html",
        "<html><title>Security Check</title><body>Please verify you are a human</body></html>",
    )
}

pub fn rate_limited() -> RawResponse {
    RawResponse::new(429, "text/plain", "Too Many Requests")
}

pub fn not_found() -> RawResponse {
    RawResponse::new(404, "text/html", "")
}

pub fn malformed() -> RawResponse {
    RawResponse::new(200, "application/json", r#"{"statusCode":0,"data":{}}"#)
}
