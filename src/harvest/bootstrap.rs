//! Wiring from [`Settings`] to a running [`HarvestService`].

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use super::service::HarvestService;
use super::session::{HttpSessionFactory, ManualResolver, SessionFactory, SessionPool};
use super::walker::Harvester;
use crate::config::{Settings, StoreBackend, TransportKind};
use crate::store::{BaselineStore, FileStore, IdentityStore, MemoryStore, SharedStore, WatchList};

/// Open the configured key-value store.
pub fn build_store(settings: &Settings) -> anyhow::Result<SharedStore> {
    match settings.store {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::File => {
            settings.ensure_directories().with_context(|| {
                format!(
                    "Failed to create store directory '{}'",
                    settings.store_dir().display()
                )
            })?;
            Ok(Arc::new(FileStore::new(settings.store_dir())))
        }
    }
}

/// Build the session factory for the configured transport.
pub fn build_session_factory(
    settings: &Settings,
    identities: IdentityStore,
) -> anyhow::Result<Arc<dyn SessionFactory>> {
    let http = HttpSessionFactory::new(settings.http_session()).with_identity_store(identities.clone());

    match settings.transport {
        TransportKind::Http => Ok(Arc::new(http)),
        #[cfg(feature = "browser")]
        TransportKind::Browser => Ok(Arc::new(
            super::session::BrowserSessionFactory::new(
                settings.browser.clone(),
                settings.source.format,
                settings.source.base_url.clone(),
                http,
            )
            .with_identity_store(identities),
        )),
        #[cfg(not(feature = "browser"))]
        TransportKind::Browser => {
            anyhow::bail!("the browser transport requires building with --features browser")
        }
    }
}

/// Everything a front end needs: the service and the operator's handle on
/// pending challenges.
#[derive(Clone)]
pub struct Runtime {
    pub service: Arc<HarvestService>,
    pub resolver: Arc<ManualResolver>,
}

impl Runtime {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        settings.validate().map_err(anyhow::Error::msg)?;
        let store = build_store(settings)?;
        Self::with_store(settings, store)
    }

    /// Build on an existing store; used by tests and the in-memory backend.
    pub fn with_store(settings: &Settings, store: SharedStore) -> anyhow::Result<Self> {
        let factory = build_session_factory(settings, IdentityStore::new(store.clone()))?;
        Ok(Self::with_factory(settings, store, factory))
    }

    /// Build around a caller-supplied session factory.
    pub fn with_factory(
        settings: &Settings,
        store: SharedStore,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        let pool = Arc::new(SessionPool::new(factory, settings.service.pool_size));
        let resolver = Arc::new(ManualResolver::new());
        let harvester = Harvester::new(
            pool,
            resolver.clone(),
            Arc::new(settings.source.clone()),
            settings.walk.clone(),
            settings.escalation.clone(),
        );
        let service = HarvestService::new(
            harvester,
            BaselineStore::new(store.clone()),
            WatchList::new(store),
            settings.service.clone(),
        );
        info!(
            "Harvest runtime ready (transport={}, pool_size={}, busy={:?})",
            service.transport(),
            settings.service.pool_size,
            settings.service.busy
        );
        Self {
            service: Arc::new(service),
            resolver,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::testing::{page, raw_item, ScriptedFactory};

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.store = StoreBackend::Memory;
        settings.source.base_url = "https://example.com".to_string();
        settings
    }

    #[test]
    fn test_from_settings_requires_base_url() {
        let mut settings = settings();
        settings.source.base_url.clear();
        assert!(Runtime::from_settings(&settings).is_err());
    }

    #[test]
    fn test_http_transport() {
        let runtime = Runtime::from_settings(&settings()).unwrap();
        assert_eq!(runtime.service.transport(), "http");
    }

    #[cfg(not(feature = "browser"))]
    #[test]
    fn test_browser_transport_needs_feature() {
        let mut settings = settings();
        settings.transport = TransportKind::Browser;
        assert!(Runtime::from_settings(&settings).is_err());
    }

    #[tokio::test]
    async fn test_file_store_created_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::with_data_dir(dir.path().to_path_buf());
        settings.source.base_url = "https://example.com".to_string();

        let store = build_store(&settings).unwrap();
        WatchList::new(store).add("alice").await.unwrap();
        assert!(settings.store_dir().is_dir());
    }

    #[tokio::test]
    async fn test_with_factory_harvests() {
        let factory = ScriptedFactory::queue(vec![Ok(page(
            vec![raw_item("1", 10, 1_700_000_000), raw_item("2", 20, 1_700_000_100)],
            None,
            false,
        ))]);
        let runtime = Runtime::with_factory(&settings(), Arc::new(MemoryStore::new()), factory);
        let report = runtime.service.refresh("alice", None, false).await.unwrap();
        assert_eq!(report.items.len(), 2);
    }
}
