//! # `pkgstore`
//!
//! A content-addressed package store: resolve dependency preferences to
//! canonical identities, fetch their content exactly once, verify it, and
//! materialize it on disk for reuse by a package manager's installation
//! pipeline.
//!
//! ## Architecture
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          pkgstore                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  resolver/      │ WantedDependency -> ResolvedDependency       │
//! │  fetcher/       │ Resolution -> bytes on disk                  │
//! │  http/          │ retryable JSON GET + streaming download       │
//! │  scheduler      │ global bounded-concurrency admission          │
//! │  coordinator    │ de-duplication, staged publish, verification  │
//! │  completable    │ set-once futures handed out to fetch callers  │
//! │  index          │ persistent "is this identity cached?" map     │
//! │  integrity      │ SRI digests, fast vs strict verification      │
//! │  observability  │ structured progress/error events              │
//! │  config         │ layered store configuration                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//! ```no_run
//! use pkgstore::{PackageStore, VerifyMode};
//! use pkgstore::wanted::WantedDependency;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PackageStore::builder("/var/cache/pkgstore").build()?;
//! let wanted = WantedDependency::new("^1.0.0");
//! let fetched = store.fetch(&wanted, false, VerifyMode::Fast).await?;
//! println!("{} is at {}", fetched.identity, fetched.path.display());
//! # Ok(())
//! # }
//! ```

pub mod completable;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod identity;
pub mod index;
pub mod integrity;
pub mod manifest;
pub mod observability;
pub mod resolution;
pub mod resolver;
pub mod scheduler;
pub mod unpack;
pub mod wanted;

use std::path::PathBuf;
use std::sync::Arc;

use config::StoreConfig;
use coordinator::{FetchCoordinator, FetchOutcome, FetchedPackage};
use error::StoreResult;
use fetcher::git::GitFetcher;
use fetcher::tarball::TarballFetcher;
use fetcher::FetcherRegistry;
use http::{CredentialsProvider, HttpClient, StaticCredentials};
use index::{FileSystemStoreIndex, StoreIndex};
use integrity::{IntegrityChecker, IntegrityVerifier, SsriIntegrityChecker};
use observability::{ObservabilityBus, Observer};
use resolver::directory::DirectoryResolver;
use resolver::git::{GitRefResolver, GitResolver};
use resolver::tarball::TarballResolver;
use resolver::ResolverRegistry;
use scheduler::RequestScheduler;
use wanted::WantedDependency;

pub use coordinator::{FetchHandle, FilesOutcome, LocalDependency, VerifyMode};

/// A content-addressed package store: the top-level entry point wiring
/// every subsystem together behind a single `fetch` call.
pub struct PackageStore {
    coordinator: FetchCoordinator,
    default_registry: String,
}

impl PackageStore {
    /// Start building a store rooted at `store_root`.
    #[must_use]
    pub fn builder(store_root: impl Into<PathBuf>) -> PackageStoreBuilder {
        PackageStoreBuilder::new(store_root)
    }

    /// Resolve `wanted` and ensure its content is present and verified on
    /// disk, waiting for the manifest, the unpacked files, and the
    /// recorded integrity to all settle.
    pub async fn fetch(
        &self,
        wanted: &WantedDependency,
        offline: bool,
        verify_mode: VerifyMode,
    ) -> StoreResult<FetchedPackage> {
        let outcome = self.resolve_and_fetch_handle(wanted, offline, verify_mode).await?;
        FetchedPackage::await_all(outcome).await
    }

    /// Fetch a dependency whose resolution is already known, e.g. pinned by a lockfile.
    pub async fn fetch_known(
        &self,
        identity: identity::PackageIdentity,
        resolution: resolution::Resolution,
        package: Option<manifest::PackageManifest>,
        offline: bool,
        verify_mode: VerifyMode,
    ) -> StoreResult<FetchedPackage> {
        let outcome = self.fetch_known_handle(identity, resolution, package, offline, verify_mode).await?;
        FetchedPackage::await_all(outcome).await
    }

    /// Resolve `wanted` and return a handle to its fetch without waiting
    /// for any of the three independent futures to settle.
    pub async fn resolve_and_fetch_handle(
        &self,
        wanted: &WantedDependency,
        offline: bool,
        verify_mode: VerifyMode,
    ) -> StoreResult<FetchOutcome> {
        let opts = resolver::ResolveOptions { registry: self.registry().to_string(), offline };
        self.coordinator.resolve_and_fetch(wanted, &opts, verify_mode).await
    }

    /// Like [`Self::fetch_known`], but returns a handle without waiting
    /// for any of the three independent futures to settle.
    pub async fn fetch_known_handle(
        &self,
        identity: identity::PackageIdentity,
        resolution: resolution::Resolution,
        package: Option<manifest::PackageManifest>,
        offline: bool,
        verify_mode: VerifyMode,
    ) -> StoreResult<FetchOutcome> {
        self.coordinator.fetch_known(identity, resolution, package, offline, verify_mode).await
    }

    fn registry(&self) -> &str {
        &self.default_registry
    }
}

/// Builds a [`PackageStore`] from configuration and optional overrides for
/// its pluggable collaborators (credentials, git checkout mechanics, extra
/// fetchers/resolvers).
pub struct PackageStoreBuilder {
    store_root: PathBuf,
    config: StoreConfig,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    checker: Option<Arc<dyn IntegrityChecker>>,
    git_refs: Option<Arc<dyn GitRefResolver>>,
    git_checkout: Option<Arc<dyn fetcher::git::GitCheckout>>,
    observers: Vec<Arc<dyn Observer>>,
}

impl PackageStoreBuilder {
    fn new(store_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
            config: StoreConfig::default(),
            credentials: None,
            checker: None,
            git_refs: None,
            git_checkout: None,
            observers: Vec::new(),
        }
    }

    /// Use an explicit configuration instead of defaults.
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Supply credentials for authenticated registries/tarball hosts.
    #[must_use]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Override the integrity digest implementation.
    #[must_use]
    pub fn integrity_checker(mut self, checker: Arc<dyn IntegrityChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Supply the git ref-resolution mechanism (required to fetch `git+...` dependencies).
    #[must_use]
    pub fn git_ref_resolver(mut self, refs: Arc<dyn GitRefResolver>) -> Self {
        self.git_refs = Some(refs);
        self
    }

    /// Supply the git checkout mechanism (required to fetch `git+...` dependencies).
    #[must_use]
    pub fn git_checkout(mut self, checkout: Arc<dyn fetcher::git::GitCheckout>) -> Self {
        self.git_checkout = Some(checkout);
        self
    }

    /// Register an observer for progress/error events.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Assemble the store.
    pub fn build(self) -> StoreResult<PackageStore> {
        let mut bus = ObservabilityBus::new();
        for observer in self.observers {
            bus.register(observer);
        }

        let credentials = self.credentials.unwrap_or_else(|| Arc::new(StaticCredentials::default()));
        let checker: Arc<dyn IntegrityChecker> = self.checker.unwrap_or_else(|| Arc::new(SsriIntegrityChecker));
        let unpacker = Arc::new(unpack::TarGzUnpacker);

        let http_client =
            Arc::new(HttpClient::new(&self.config, credentials, Arc::clone(&checker), unpacker, bus.clone())?);

        let mut resolvers = ResolverRegistry::new();
        resolvers.register(Arc::new(TarballResolver));
        resolvers.register(Arc::new(DirectoryResolver));
        if let Some(git_refs) = self.git_refs {
            resolvers.register(Arc::new(GitResolver::new(git_refs)));
        }

        let mut fetchers = FetcherRegistry::new();
        fetchers.register(Arc::new(TarballFetcher::new(Arc::clone(&http_client))));
        if let Some(git_checkout) = self.git_checkout {
            fetchers.register(Arc::new(GitFetcher::new(git_checkout, Arc::clone(&checker))));
        }

        let index: Arc<dyn StoreIndex> =
            Arc::new(FileSystemStoreIndex::open(self.store_root.join("store-index.json"))?);
        let verifier = IntegrityVerifier::new(checker);
        let scheduler = RequestScheduler::new(self.config.network_concurrency);

        let coordinator =
            FetchCoordinator::new(self.store_root, scheduler, resolvers, fetchers, index, verifier, bus);

        Ok(PackageStore { coordinator, default_registry: self.config.registry })
    }
}
