//! Resolves dependencies whose `pref` is a direct tarball URL.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::resolution::Resolution;
use crate::wanted::WantedDependency;

use super::{ResolveOptions, ResolvedDependency, Resolver};

/// Claims `pref`s that look like a direct `http(s)://...tgz` URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarballResolver;

impl TarballResolver {
    fn looks_like_tarball_url(pref: &str) -> bool {
        (pref.starts_with("http://") || pref.starts_with("https://"))
            && (pref.ends_with(".tgz") || pref.ends_with(".tar.gz"))
    }
}

#[async_trait]
impl Resolver for TarballResolver {
    fn claims(&self, wanted: &WantedDependency) -> bool {
        Self::looks_like_tarball_url(&wanted.pref)
    }

    async fn resolve(&self, wanted: &WantedDependency, opts: &ResolveOptions) -> StoreResult<ResolvedDependency> {
        // The URL itself is stable and globally unique, so it doubles as
        // the canonical identity.
        let identity = wanted.pref.clone();
        Ok(ResolvedDependency {
            identity,
            resolution: Resolution::Tarball {
                url: wanted.pref.clone(),
                integrity: None,
                registry: Some(opts.registry.clone()),
            },
            package: None,
            latest: None,
            normalized_pref: None,
        })
    }
}
