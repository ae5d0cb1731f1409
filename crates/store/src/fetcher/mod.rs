//! Dispatches a [`Resolution`] to one of several type-specific fetchers.

pub mod git;
pub mod tarball;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::integrity::StoreIntegrity;
use crate::resolution::Resolution;
use crate::unpack::{IgnorePredicate, UnpackResult};

/// Per-call options a fetcher needs to materialize content.
pub struct FetchOptions {
    /// Skip archive entries (or files) for which this returns `true`.
    pub ignore: Option<IgnorePredicate>,
    /// Whether to compute a per-file integrity index rather than a
    /// single whole-package digest.
    pub generate_package_integrity: bool,
    /// The identity being fetched, for progress events and logging.
    pub identity: String,
    /// Where to cache the raw downloaded archive, for fetchers that
    /// produce one (tarball fetches do; a git checkout has none).
    pub packed_path: Option<PathBuf>,
}

/// What a fetch produces: the files written plus the integrity to record.
pub struct FetcherOutcome {
    /// Files written under the target directory.
    pub unpacked: UnpackResult,
    /// The integrity record to persist to `integrity.json`.
    pub integrity: StoreIntegrity,
}

/// Maps a [`Resolution`] to bytes materialized under `target_dir`.
///
/// A fetcher owns all network I/O and unpacking for its resolution
/// type; it must leave `target_dir` populated with package content
/// only on success.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// The dispatch key this fetcher handles (`Resolution::type_tag()`).
    fn type_tag(&self) -> &str;

    /// Fetch `resolution`'s content into `target_dir`.
    async fn fetch(&self, resolution: &Resolution, target_dir: &Path, opts: &FetchOptions) -> StoreResult<FetcherOutcome>;
}

/// Fetchers keyed by the resolution type they handle.
#[derive(Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<String, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fetcher under its own `type_tag`.
    pub fn register(&mut self, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(fetcher.type_tag().to_string(), fetcher);
    }

    /// Fetch `resolution`, dispatching on its type tag.
    pub async fn fetch(&self, resolution: &Resolution, target_dir: &Path, opts: &FetchOptions) -> StoreResult<FetcherOutcome> {
        let tag = resolution.type_tag();
        let fetcher = self
            .fetchers
            .get(tag)
            .ok_or_else(|| StoreError::UnsupportedResolution { type_tag: tag.to_string() })?;
        fetcher.fetch(resolution, target_dir, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_type_is_unsupported() {
        let registry = FetcherRegistry::new();
        let resolution = Resolution::Git { repo: "x".into(), commit: "y".into() };
        let opts = FetchOptions { ignore: None, generate_package_integrity: false, identity: "x".into(), packed_path: None };
        let err = registry.fetch(&resolution, Path::new("/tmp/nowhere"), &opts).await.unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedResolution { .. }));
    }
}
