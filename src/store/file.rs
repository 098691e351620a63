//! File-backed store: one JSON file per key, one directory per namespace.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{KvStore, StoreError, StoreResult};

const EXTENSION: &str = "json";

/// Store that keeps each key in `{root}/{namespace}/{encoded key}.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    fn key_path(&self, namespace: &str, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey {
                namespace: namespace.to_string(),
                key: key.to_string(),
            });
        }
        Ok(self
            .namespace_dir(namespace)
            .join(format!("{}.{}", encode_key(key), EXTENSION)))
    }
}

/// Encode a key into a filename-safe form (form-urlencoding keeps
/// alphanumerics and `*-._`).
fn encode_key(key: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
    // A bare "." or ".." would escape the namespace directory.
    encoded.replace('.', "%2E")
}

fn decode_key(stem: &str) -> String {
    url::form_urlencoded::parse(stem.as_bytes())
        .map(|(k, _)| k.into_owned())
        .next()
        .unwrap_or_default()
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<String>> {
        let path = self.key_path(namespace, key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, namespace: &str, key: &str, value: String) -> StoreResult<()> {
        let path = self.key_path(namespace, key)?;
        let dir = self.namespace_dir(namespace);

        tokio::task::spawn_blocking(move || -> StoreResult<()> {
            std::fs::create_dir_all(&dir)?;
            // Write next to the target so the rename stays on one filesystem.
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(value.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
            debug!("Wrote {}", path.display());
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool> {
        let path = self.key_path(namespace, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, namespace: &str) -> StoreResult<Vec<String>> {
        let dir = self.namespace_dir(namespace);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(decode_key(stem));
            }
        }
        keys.sort();
        Ok(keys)
    }
}
