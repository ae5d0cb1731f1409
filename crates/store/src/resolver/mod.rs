//! Dispatches a wanted dependency to one of several type-specific resolvers.

pub mod directory;
pub mod git;
pub mod tarball;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::identity::PackageIdentity;
use crate::manifest::PackageManifest;
use crate::resolution::Resolution;
use crate::wanted::WantedDependency;

/// Per-call options a resolver needs to do its job.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// The default registry, used to qualify bare tarball/manifest URLs.
    pub registry: String,
    /// When set, resolvers must not perform network I/O.
    pub offline: bool,
}

/// What a successful resolution produces.
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    /// The canonical identity this dependency resolved to.
    pub identity: PackageIdentity,
    /// Where the resolved package's content can be obtained.
    pub resolution: Resolution,
    /// The manifest, if the resolver could read it without a separate fetch
    /// (e.g. local directories).
    pub package: Option<PackageManifest>,
    /// The latest available version, if the resolver tracks one.
    pub latest: Option<String>,
    /// The `pref` normalized to a canonical form, if different from the input.
    pub normalized_pref: Option<String>,
}

/// Maps a [`WantedDependency`] to a [`ResolvedDependency`].
///
/// Implementations that need network access must fail with
/// [`StoreError::OfflineMiss`] when `opts.offline` is set and no cached
/// metadata is sufficient.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Whether this resolver claims the given dependency's `pref`.
    /// Resolvers are probed in registration order; the first match owns it.
    fn claims(&self, wanted: &WantedDependency) -> bool;

    /// Resolve the dependency.
    async fn resolve(&self, wanted: &WantedDependency, opts: &ResolveOptions) -> StoreResult<ResolvedDependency>;
}

/// An ordered list of resolvers, probed in registration order.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: Vec<std::sync::Arc<dyn Resolver>>,
}

impl ResolverRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver. Later registrations are only consulted after
    /// earlier ones decline to claim a dependency.
    pub fn register(&mut self, resolver: std::sync::Arc<dyn Resolver>) {
        self.resolvers.push(resolver);
    }

    /// Resolve `wanted` using the first resolver that claims it.
    pub async fn resolve(&self, wanted: &WantedDependency, opts: &ResolveOptions) -> StoreResult<ResolvedDependency> {
        for resolver in &self.resolvers {
            if resolver.claims(wanted) {
                return resolver.resolve(wanted, opts).await;
            }
        }
        Err(StoreError::NotFound { pref: wanted.pref.clone() })
    }
}
