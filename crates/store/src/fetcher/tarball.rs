//! Fetches `Resolution::Tarball` via the HTTP client.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::http::{DownloadOptions, HttpClient};
use crate::resolution::Resolution;

use super::{Fetcher, FetchOptions, FetcherOutcome};

/// Downloads and unpacks a tarball, caching the raw bytes alongside the
/// unpacked content.
pub struct TarballFetcher {
    client: Arc<HttpClient>,
}

impl TarballFetcher {
    /// Build a fetcher around a shared [`HttpClient`].
    #[must_use]
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for TarballFetcher {
    fn type_tag(&self) -> &str {
        "tarball"
    }

    async fn fetch(&self, resolution: &Resolution, target_dir: &Path, opts: &FetchOptions) -> StoreResult<FetcherOutcome> {
        let Resolution::Tarball { url, integrity, registry } = resolution else {
            return Err(StoreError::operation("tarball fetch", "resolution is not a tarball"));
        };

        // `target_dir` is the staging directory the coordinator will
        // atomically rename into place, so the package's content is
        // unpacked directly into it. The cached tarball is saved at the
        // permanent location the coordinator supplies (`packed.tgz`
        // sitting next to the published entry), not inside the stage.
        let stage_file_name = target_dir.file_name().map_or_else(|| "entry".to_string(), |n| n.to_string_lossy().into_owned());
        let packed_path = opts.packed_path.clone().unwrap_or_else(|| target_dir.with_file_name(format!("{stage_file_name}.tgz")));
        let unpack_to = target_dir.to_path_buf();

        let download_opts = DownloadOptions {
            unpack_to,
            integrity: integrity.clone(),
            ignore: opts.ignore.clone(),
            generate_package_integrity: opts.generate_package_integrity,
            registry: registry.clone(),
            always_auth: false,
            identity: opts.identity.clone(),
            attempt_hint: 0,
        };

        let outcome = self.client.download(url, &packed_path, &download_opts).await?;
        Ok(FetcherOutcome { unpacked: outcome.unpacked, integrity: outcome.integrity })
    }
}
