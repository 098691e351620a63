//! Typed access to the `baselines` namespace.

use crate::models::SubjectBaseline;

use super::{get_json, put_json, SharedStore, StoreResult, BASELINE_NAMESPACE};

/// Per-subject baseline documents.
#[derive(Clone)]
pub struct BaselineStore {
    store: SharedStore,
}

impl BaselineStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn load(&self, subject: &str) -> StoreResult<Option<SubjectBaseline>> {
        get_json(self.store.as_ref(), BASELINE_NAMESPACE, subject).await
    }

    /// Replace the subject's whole baseline document.
    pub async fn save(&self, subject: &str, baseline: &SubjectBaseline) -> StoreResult<()> {
        put_json(self.store.as_ref(), BASELINE_NAMESPACE, subject, baseline).await
    }

    pub async fn delete(&self, subject: &str) -> StoreResult<bool> {
        self.store.delete(BASELINE_NAMESPACE, subject).await
    }

    pub async fn subjects(&self) -> StoreResult<Vec<String>> {
        self.store.keys(BASELINE_NAMESPACE).await
    }
}
