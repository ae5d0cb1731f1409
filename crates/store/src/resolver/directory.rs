//! Resolves local-path dependency prefs.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::manifest::PackageManifest;
use crate::resolution::Resolution;
use crate::wanted::WantedDependency;

use super::{ResolveOptions, ResolvedDependency, Resolver};

/// Claims `pref`s that name a filesystem path (`file:`, `./`, `../`, or
/// an absolute path) rather than a registry range, URL, or git ref.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryResolver;

impl DirectoryResolver {
    fn path_of(pref: &str) -> Option<&str> {
        if let Some(path) = pref.strip_prefix("file:") {
            return Some(path);
        }
        if pref.starts_with("./") || pref.starts_with("../") || pref.starts_with('/') {
            return Some(pref);
        }
        None
    }
}

#[async_trait]
impl Resolver for DirectoryResolver {
    fn claims(&self, wanted: &WantedDependency) -> bool {
        Self::path_of(&wanted.pref).is_some()
    }

    async fn resolve(&self, wanted: &WantedDependency, _opts: &ResolveOptions) -> StoreResult<ResolvedDependency> {
        let path = Self::path_of(&wanted.pref).expect("claims() guarantees a path");
        let manifest = PackageManifest::read_from_dir(path)?;
        let identity = format!("file:{path}");

        Ok(ResolvedDependency {
            identity,
            resolution: Resolution::Directory { path: path.to_string() },
            package: Some(manifest),
            latest: None,
            normalized_pref: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn claims_local_paths() {
        let resolver = DirectoryResolver;
        assert!(resolver.claims(&WantedDependency::new("./packages/foo")));
        assert!(resolver.claims(&WantedDependency::new("file:../foo")));
        assert!(!resolver.claims(&WantedDependency::new("^1.0.0")));
    }

    #[tokio::test]
    async fn resolve_reads_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"name": "foo", "version": "1.0.0"}"#).unwrap();

        let resolver = DirectoryResolver;
        let wanted = WantedDependency::new(dir.path().to_string_lossy().into_owned());
        let opts = ResolveOptions { registry: "https://registry.npmjs.org".into(), offline: true };
        let resolved = resolver.resolve(&wanted, &opts).await.unwrap();
        assert_eq!(resolved.package.unwrap().name, "foo");
    }

    #[tokio::test]
    async fn resolve_fails_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = DirectoryResolver;
        let wanted = WantedDependency::new(dir.path().to_string_lossy().into_owned());
        let opts = ResolveOptions { registry: "https://registry.npmjs.org".into(), offline: true };
        let err = resolver.resolve(&wanted, &opts).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingManifest { .. }));
    }
}
