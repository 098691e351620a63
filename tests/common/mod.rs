//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use viewharvest::config::{Settings, StoreBackend};
use viewharvest::harvest::session::{FetchSession, FetchTarget, RawResponse, SessionFactory};
use viewharvest::harvest::{FetchError, Runtime, SessionMode};
use viewharvest::store::{MemoryStore, SharedStore};

type Responder = dyn Fn(SessionMode, &FetchTarget) -> Result<RawResponse, FetchError> + Send + Sync;

/// A remote source simulated by a closure.
pub struct SimulatedSource {
    responder: Arc<Responder>,
    fetches: Arc<AtomicUsize>,
}

impl SimulatedSource {
    pub fn new(
        responder: impl Fn(SessionMode, &FetchTarget) -> Result<RawResponse, FetchError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Arc::new(responder),
            fetches: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for SimulatedSource {
    async fn open(&self, mode: SessionMode) -> Result<Box<dyn FetchSession>, FetchError> {
        Ok(Box::new(SimulatedSession {
            mode,
            responder: self.responder.clone(),
            fetches: self.fetches.clone(),
        }))
    }

    fn transport(&self) -> &'static str {
        "simulated"
    }
}

struct SimulatedSession {
    mode: SessionMode,
    responder: Arc<Responder>,
    fetches: Arc<AtomicUsize>,
}

#[async_trait]
impl FetchSession for SimulatedSession {
    fn mode(&self) -> SessionMode {
        self.mode
    }

    async fn fetch(&mut self, target: &FetchTarget) -> Result<RawResponse, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        (self.responder)(self.mode, target)
    }

    async fn close(&mut self) {}
}

/// Settings for an in-memory runtime with millisecond backoffs.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.store = StoreBackend::Memory;
    settings.source.base_url = "https://example.com".to_string();
    settings.stealth_delay_ms = 0;
    settings.escalated_delay_ms = 0;
    settings.escalation.backoff_base = Duration::from_millis(1);
    settings.escalation.backoff_cap = Duration::from_millis(5);
    settings.escalation.manual_wait_timeout = Duration::from_millis(20);
    settings
}

pub fn runtime_with(source: Arc<SimulatedSource>) -> (Runtime, SharedStore) {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let runtime = Runtime::with_factory(&test_settings(), store.clone(), source);
    (runtime, store)
}

/// Raw item in the API shape. Newer items have larger ids.
pub fn raw_item(n: usize, views: u64) -> Value {
    json!({
        "id": format!("{}", 7_000_000 + n),
        "createTime": 1_700_000_000 + n as i64 * 60,
        "stats": {"playCount": views},
        "video": {"cover": format!("https://cdn.example.com/{}.jpg", n)},
    })
}

pub fn api_page(items: Vec<Value>, cursor: &str, has_more: bool) -> RawResponse {
    let body = json!({
        "statusCode": 0,
        "itemList": items,
        "cursor": cursor,
        "hasMore": has_more,
    });
    RawResponse::new(200, "application/json", body.to_string())
}

/// `total` items served newest first, `per_page` at a time; the cursor is
/// the offset of the next page.
pub fn paged(total: usize, per_page: usize, views: impl Fn(usize) -> u64 + Send + Sync + 'static)
    -> impl Fn(SessionMode, &FetchTarget) -> Result<RawResponse, FetchError> + Send + Sync + 'static
{
    move |_, target| {
        let offset: usize = target.cursor.parse().unwrap_or(0);
        let end = (offset + per_page).min(total);
        let items = (offset..end)
            .map(|i| {
                let n = total - i;
                raw_item(n, views(n))
            })
            .collect();
        Ok(api_page(items, &end.to_string(), end < total))
    }
}

pub fn rate_limited() -> RawResponse {
    RawResponse::new(429, "text/plain", "Too Many Requests")
}
