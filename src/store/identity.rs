//! Persisted session identity (cookies) keyed by session mode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{get_json, put_json, SharedStore, StoreResult, IDENTITY_NAMESPACE};

/// Cookie state captured from a session so the next process can resume with
/// the same identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySnapshot {
    /// Origin the cookies belong to.
    pub origin: String,
    /// `name=value` pairs as sent in a Cookie header.
    pub cookies: Vec<String>,
    pub user_agent: Option<String>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl IdentitySnapshot {
    /// Build a snapshot from a `Cookie` header value.
    pub fn from_cookie_header(origin: &str, header: &str) -> Self {
        Self {
            origin: origin.to_string(),
            cookies: header
                .split(';')
                .map(|c| c.trim().to_string())
                .filter(|c| c.contains('='))
                .collect(),
            user_agent: None,
            saved_at: Some(Utc::now()),
        }
    }
}

#[derive(Clone)]
pub struct IdentityStore {
    store: SharedStore,
}

impl IdentityStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn load(&self, key: &str) -> StoreResult<Option<IdentitySnapshot>> {
        get_json(self.store.as_ref(), IDENTITY_NAMESPACE, key).await
    }

    pub async fn save(&self, key: &str, snapshot: &IdentitySnapshot) -> StoreResult<()> {
        put_json(self.store.as_ref(), IDENTITY_NAMESPACE, key, snapshot).await
    }

    /// Forget an identity the remote side has invalidated.
    pub async fn clear(&self, key: &str) -> StoreResult<bool> {
        self.store.delete(IDENTITY_NAMESPACE, key).await
    }
}
