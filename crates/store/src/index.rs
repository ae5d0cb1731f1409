//! Persistent mapping from a store-relative path to ingest metadata.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Metadata recorded for a store entry at ingest time, sufficient to
/// prove the entry was fetched and verified at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// The canonical identity this entry was ingested for.
    pub identity: String,
    /// Unix timestamp (seconds) the entry was published.
    pub fetched_at: u64,
}

/// Source of truth for "is this identity already in the store?".
///
/// Implementations must tolerate concurrent readers and serialize
/// writers; the core only requires that records survive across process
/// runs, not any particular storage engine.
#[async_trait]
pub trait StoreIndex: Send + Sync {
    /// Whether `rel` has a recorded entry.
    async fn has(&self, rel: &str) -> bool;

    /// Fetch the recorded metadata for `rel`, if any.
    async fn get(&self, rel: &str) -> Option<EntryMetadata>;

    /// Record `meta` for `rel`, persisting it before returning.
    async fn record(&self, rel: &str, meta: EntryMetadata) -> StoreResult<()>;
}

/// A [`StoreIndex`] backed by a single JSON file, rewritten atomically
/// (temp file + rename) on every write.
pub struct FileSystemStoreIndex {
    path: PathBuf,
    entries: RwLock<HashMap<String, EntryMetadata>>,
}

impl FileSystemStoreIndex {
    /// Load (or initialize) the index file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            HashMap::new()
        };
        Ok(Self { path, entries: RwLock::new(entries) })
    }

    fn persist(&self, entries: &HashMap<String, EntryMetadata>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl StoreIndex for FileSystemStoreIndex {
    async fn has(&self, rel: &str) -> bool {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).contains_key(rel)
    }

    async fn get(&self, rel: &str) -> Option<EntryMetadata> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).get(rel).cloned()
    }

    async fn record(&self, rel: &str, meta: EntryMetadata) -> StoreResult<()> {
        let snapshot = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.insert(rel.to_string(), meta);
            entries.clone()
        };
        self.persist(&snapshot)
    }
}

/// Resolve `identity`'s package.json existence as required by the "hit
/// probe" step: the index must agree *and* the on-disk symlink target
/// must still be readable, or the entry is treated as absent.
pub async fn is_present(index: &dyn StoreIndex, rel: &str, link_to_unpacked: &Path) -> bool {
    index.has(rel).await && link_to_unpacked.join("package.json").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("store-index.json");

        {
            let index = FileSystemStoreIndex::open(&index_path).unwrap();
            index.record("foo/1.0.0", EntryMetadata { identity: "foo@1.0.0".into(), fetched_at: 1 }).await.unwrap();
        }

        let reopened = FileSystemStoreIndex::open(&index_path).unwrap();
        assert!(reopened.has("foo/1.0.0").await);
        assert_eq!(reopened.get("foo/1.0.0").await.unwrap().identity, "foo@1.0.0");
    }

    #[tokio::test]
    async fn missing_entry_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let index = FileSystemStoreIndex::open(dir.path().join("index.json")).unwrap();
        assert!(!index.has("nonexistent").await);
    }

    #[tokio::test]
    async fn is_present_requires_both_index_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let index = FileSystemStoreIndex::open(dir.path().join("index.json")).unwrap();
        index.record("foo/1.0.0", EntryMetadata { identity: "foo@1.0.0".into(), fetched_at: 1 }).await.unwrap();

        let link_dir = dir.path().join("link");
        std::fs::create_dir_all(&link_dir).unwrap();
        assert!(!is_present(&index, "foo/1.0.0", &link_dir).await);

        std::fs::write(link_dir.join("package.json"), "{}").unwrap();
        assert!(is_present(&index, "foo/1.0.0", &link_dir).await);
    }
}
