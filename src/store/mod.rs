//! Key-value persistence for the watch list, baselines and session identity.
//!
//! Values are whole JSON documents written atomically per key, so a
//! concurrent reader sees either the previous or the next value of a subject,
//! never a mix. Backends:
//! - [`FileStore`] - one file per key, replaced through a temp file + rename
//! - [`MemoryStore`] - ephemeral, for tests and `--store memory`

mod baselines;
mod file;
mod identity;
mod memory;
mod watchlist;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use baselines::BaselineStore;
pub use file::FileStore;
pub use identity::{IdentitySnapshot, IdentityStore};
pub use memory::MemoryStore;
pub use watchlist::WatchList;

/// Namespace holding the set of watched subjects.
pub const WATCHLIST_NAMESPACE: &str = "watchlist";
/// Namespace holding per-subject baselines.
pub const BASELINE_NAMESPACE: &str = "baselines";
/// Namespace holding persisted session identities.
pub const IDENTITY_NAMESPACE: &str = "identity";

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from key-value store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid key {key:?} in namespace {namespace}")]
    InvalidKey { namespace: String, key: String },
}

/// Trait for key-value storage backends.
///
/// `put` must replace the whole value atomically.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the raw value stored under `key`.
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, namespace: &str, key: &str, value: String) -> StoreResult<()>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool>;

    /// List all keys in a namespace.
    async fn keys(&self, namespace: &str) -> StoreResult<Vec<String>>;
}

/// Shared handle to a store backend.
pub type SharedStore = Arc<dyn KvStore>;

/// Read and deserialize a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    namespace: &str,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(namespace, key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serialize and store a JSON value.
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    namespace: &str,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let raw = serde_json::to_string_pretty(value)?;
    store.put(namespace, key, raw).await
}
