//! Watched subject list.

use std::collections::BTreeSet;

use tokio::sync::Mutex;

use super::{get_json, put_json, SharedStore, StoreResult, WATCHLIST_NAMESPACE};

const SUBJECTS_KEY: &str = "subjects";

/// Set of watched subject handles, persisted as one key.
pub struct WatchList {
    store: SharedStore,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl WatchList {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Load the list. `None` when it has never been written.
    pub async fn load(&self) -> StoreResult<Option<BTreeSet<String>>> {
        get_json(self.store.as_ref(), WATCHLIST_NAMESPACE, SUBJECTS_KEY).await
    }

    /// All watched subjects in sorted order.
    pub async fn list(&self) -> StoreResult<Vec<String>> {
        Ok(self.load().await?.unwrap_or_default().into_iter().collect())
    }

    pub async fn contains(&self, subject: &str) -> StoreResult<bool> {
        Ok(self
            .load()
            .await?
            .is_some_and(|subjects| subjects.contains(subject)))
    }

    /// Add a subject. Returns true if it was not watched before.
    pub async fn add(&self, subject: &str) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut subjects = self.load().await?.unwrap_or_default();
        if !subjects.insert(subject.to_string()) {
            return Ok(false);
        }
        put_json(self.store.as_ref(), WATCHLIST_NAMESPACE, SUBJECTS_KEY, &subjects).await?;
        Ok(true)
    }

    /// Remove a subject. Returns false if it was not watched.
    pub async fn remove(&self, subject: &str) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut subjects = match self.load().await? {
            Some(subjects) => subjects,
            None => return Ok(false),
        };
        if !subjects.remove(subject) {
            return Ok(false);
        }
        put_json(self.store.as_ref(), WATCHLIST_NAMESPACE, SUBJECTS_KEY, &subjects).await?;
        Ok(true)
    }
}
