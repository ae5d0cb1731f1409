//! Fetches `Resolution::Git` by checking out a pinned commit.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::integrity::{FileIntegrity, IntegrityChecker, StoreIntegrity};
use crate::resolution::Resolution;

use super::{Fetcher, FetchOptions, FetcherOutcome};

/// Checks out a pinned commit into a directory. Injected so the store
/// core never depends on a concrete git implementation (shelling out to
/// `git`, `git2`, or a pure-Rust client are all equally valid callers).
#[async_trait]
pub trait GitCheckout: Send + Sync {
    /// Check out `commit` of `repo` into `target_dir`, overwriting any
    /// existing contents.
    async fn checkout(&self, repo: &str, commit: &str, target_dir: &Path) -> StoreResult<()>;
}

/// Materializes a git resolution by delegating the actual checkout to a
/// [`GitCheckout`] implementation, then walking the result to build the
/// same `UnpackResult`/`StoreIntegrity` shape a tarball fetch would.
pub struct GitFetcher {
    checkout: Arc<dyn GitCheckout>,
    checker: Arc<dyn IntegrityChecker>,
}

impl GitFetcher {
    /// Build a fetcher around an injected checkout mechanism and integrity checker.
    #[must_use]
    pub fn new(checkout: Arc<dyn GitCheckout>, checker: Arc<dyn IntegrityChecker>) -> Self {
        Self { checkout, checker }
    }

    fn index_blocking(target_dir: &Path) -> StoreResult<(crate::unpack::UnpackResult, Vec<(String, Vec<u8>)>)> {
        use crate::unpack::UnpackedFile;

        let mut files = Vec::new();
        let mut contents = Vec::new();

        for entry in walkdir::WalkDir::new(target_dir).into_iter() {
            let entry = entry.map_err(|e| StoreError::operation("git checkout indexing", e.to_string()))?;
            if entry.path() == target_dir || !entry.file_type().is_file() {
                continue;
            }
            // The `.git` directory is the checkout's own bookkeeping, not
            // package content.
            if entry.path().components().any(|c| c.as_os_str() == ".git") {
                continue;
            }

            let rel_path = entry.path().strip_prefix(target_dir).unwrap_or(entry.path()).to_string_lossy().into_owned();
            let data = std::fs::read(entry.path())?;
            let size = data.len() as u64;
            #[cfg(unix)]
            let mode = {
                use std::os::unix::fs::PermissionsExt;
                entry.path().metadata()?.permissions().mode()
            };
            #[cfg(not(unix))]
            let mode = 0o644;

            files.push(UnpackedFile { path: rel_path.clone(), mode, size });
            contents.push((rel_path, data));
        }

        Ok((crate::unpack::UnpackResult { files }, contents))
    }
}

#[async_trait]
impl Fetcher for GitFetcher {
    fn type_tag(&self) -> &str {
        "git"
    }

    async fn fetch(&self, resolution: &Resolution, target_dir: &Path, opts: &FetchOptions) -> StoreResult<FetcherOutcome> {
        let Resolution::Git { repo, commit } = resolution else {
            return Err(StoreError::operation("git fetch", "resolution is not a git ref"));
        };

        self.checkout.checkout(repo, commit, target_dir).await?;

        let target_dir = target_dir.to_path_buf();
        let (mut unpacked, contents) = tokio::task::spawn_blocking(move || Self::index_blocking(&target_dir))
            .await
            .map_err(|e| StoreError::operation("git checkout indexing", e.to_string()))??;

        if let Some(ignore) = &opts.ignore {
            unpacked.files.retain(|f| !ignore(&f.path));
        }

        let integrity = if opts.generate_package_integrity {
            let mut index = std::collections::HashMap::new();
            for (rel_path, data) in &contents {
                if !unpacked.files.iter().any(|f| &f.path == rel_path) {
                    continue;
                }
                let digest = self.checker.generate(data);
                let mode = unpacked.files.iter().find(|f| &f.path == rel_path).map_or(0o644, |f| f.mode);
                index.insert(rel_path.clone(), FileIntegrity { integrity: digest, mode, size: data.len() as u64 });
            }
            StoreIntegrity::PerFile(index)
        } else {
            let mut whole = Vec::new();
            for (_, data) in &contents {
                whole.extend_from_slice(data);
            }
            StoreIntegrity::Whole(self.checker.generate(&whole))
        };

        Ok(FetcherOutcome { unpacked, integrity })
    }
}
