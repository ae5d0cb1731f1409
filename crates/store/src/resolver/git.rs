//! Resolves `git+...` dependency prefs to a pinned commit.

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::resolution::Resolution;
use crate::wanted::WantedDependency;

use super::{ResolveOptions, ResolvedDependency, Resolver};

/// Resolves a git ref (branch, tag, or left unspecified for the default
/// branch) to a concrete commit hash. Injected so the store core never
/// depends on a git implementation directly.
#[async_trait]
pub trait GitRefResolver: Send + Sync {
    /// Resolve `repo`'s `reference` (or its default branch, if `None`) to a commit hash.
    async fn resolve_commit(&self, repo: &str, reference: Option<&str>) -> StoreResult<String>;
}

/// Claims `pref`s of the shape `git+<url>[#<ref>]` or any URL ending in `.git`.
pub struct GitResolver {
    refs: std::sync::Arc<dyn GitRefResolver>,
}

impl GitResolver {
    /// Build a resolver around an injected [`GitRefResolver`].
    #[must_use]
    pub fn new(refs: std::sync::Arc<dyn GitRefResolver>) -> Self {
        Self { refs }
    }

    fn parse(pref: &str) -> Option<(&str, Option<&str>)> {
        let stripped = pref.strip_prefix("git+").unwrap_or(pref);
        if !stripped.ends_with(".git") && !stripped.contains(".git#") && !stripped.contains(".git?") {
            return None;
        }
        match stripped.split_once('#') {
            Some((repo, reference)) => Some((repo, Some(reference))),
            None => Some((stripped, None)),
        }
    }
}

#[async_trait]
impl Resolver for GitResolver {
    fn claims(&self, wanted: &WantedDependency) -> bool {
        Self::parse(&wanted.pref).is_some()
    }

    async fn resolve(&self, wanted: &WantedDependency, opts: &ResolveOptions) -> StoreResult<ResolvedDependency> {
        let (repo, reference) =
            Self::parse(&wanted.pref).ok_or_else(|| StoreError::BadPref {
                pref: wanted.pref.clone(),
                reason: "not a recognizable git dependency".into(),
            })?;

        if opts.offline {
            return Err(StoreError::OfflineMiss { identity: wanted.pref.clone() });
        }

        let commit = self.refs.resolve_commit(repo, reference).await?;
        let identity = format!("{repo}#{commit}");

        Ok(ResolvedDependency {
            identity,
            resolution: Resolution::Git { repo: repo.to_string(), commit },
            package: None,
            latest: None,
            normalized_pref: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCommit(&'static str);
    #[async_trait]
    impl GitRefResolver for FixedCommit {
        async fn resolve_commit(&self, _repo: &str, _reference: Option<&str>) -> StoreResult<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn claims_git_plus_urls() {
        let resolver = GitResolver::new(std::sync::Arc::new(FixedCommit("abc123")));
        assert!(resolver.claims(&WantedDependency::new("git+https://github.com/foo/bar.git")));
        assert!(resolver.claims(&WantedDependency::new("git+https://github.com/foo/bar.git#main")));
        assert!(!resolver.claims(&WantedDependency::new("^1.0.0")));
    }

    #[tokio::test]
    async fn resolve_pins_commit_and_builds_identity() {
        let resolver = GitResolver::new(std::sync::Arc::new(FixedCommit("deadbeef")));
        let wanted = WantedDependency::new("git+https://github.com/foo/bar.git#main");
        let opts = ResolveOptions { registry: "https://registry.npmjs.org".into(), offline: false };
        let resolved = resolver.resolve(&wanted, &opts).await.unwrap();
        assert_eq!(resolved.identity, "https://github.com/foo/bar.git#deadbeef");
    }

    #[tokio::test]
    async fn offline_is_a_miss() {
        let resolver = GitResolver::new(std::sync::Arc::new(FixedCommit("deadbeef")));
        let wanted = WantedDependency::new("git+https://github.com/foo/bar.git");
        let opts = ResolveOptions { registry: "https://registry.npmjs.org".into(), offline: true };
        let err = resolver.resolve(&wanted, &opts).await.unwrap_err();
        assert!(matches!(err, StoreError::OfflineMiss { .. }));
    }
}
