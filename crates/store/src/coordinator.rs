//! Ties resolution, fetching, verification, and indexing into a single
//! de-duplicated "get me this identity" operation.
//!
//! Concurrent requests for the same identity coalesce on a process-wide
//! locker: `identity -> {fetchingPkg, fetchingFiles, calculatingIntegrity}`.
//! The first caller for an identity inserts a freshly-created triple of
//! [`Completable`]s and spawns the staged fetch in the background; every
//! later caller (concurrent or not) gets handed the very same triple,
//! never re-entering the fetch. The lock around the locker is held only
//! for that brief check-and-insert — never across a suspension point.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry as LockerSlot;
use dashmap::DashMap;

use crate::completable::{unwrap_shared_error, Completable, Completer, SharedError};
use crate::error::{StoreError, StoreResult};
use crate::fetcher::{FetchOptions, FetcherRegistry};
use crate::identity::{identity_to_path, PackageIdentity};
use crate::index::{is_present, EntryMetadata, StoreIndex};
use crate::integrity::{IntegrityVerifier, StoreIntegrity};
use crate::manifest::PackageManifest;
use crate::observability::{ObservabilityBus, ProgressEvent};
use crate::resolution::Resolution;
use crate::resolver::{ResolveOptions, ResolvedDependency, ResolverRegistry};
use crate::scheduler::{rotate_priority, RequestScheduler};
use crate::wanted::WantedDependency;

const INTEGRITY_FILE_NAME: &str = "integrity.json";
const PACKED_FILE_NAME: &str = "packed.tgz";
const LINK_NAME: &str = "package";

/// How thoroughly a cached entry must be checked before it's trusted
/// without a refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Trust a non-empty recorded digest without touching the filesystem
    /// beyond the hit probe.
    Fast,
    /// Recompute a digest per file and compare against the record.
    Strict,
}

/// A package whose content is available on disk, either because it was
/// just fetched or because a cached entry passed verification. This is
/// the fully-settled shape; see [`FetchOutcome`] for the handle callers
/// actually receive from the coordinator.
#[derive(Debug, Clone)]
pub struct FetchedPackage {
    /// The canonical identity.
    pub identity: PackageIdentity,
    /// Where the package's content can be read from.
    pub path: PathBuf,
    /// The manifest, if one was available without an extra read.
    pub manifest: Option<PackageManifest>,
    /// Where the content came from.
    pub resolution: Resolution,
}

impl FetchedPackage {
    /// Await every future on a [`FetchOutcome`] and assemble the
    /// fully-settled result. Local dependencies settle immediately; remote
    /// ones wait for the manifest, the unpacked files, and the recorded
    /// integrity, in whatever order they actually finish.
    pub async fn await_all(outcome: FetchOutcome) -> StoreResult<Self> {
        match outcome {
            FetchOutcome::Local(local) => {
                let path = match &local.resolution {
                    Resolution::Directory { path } => PathBuf::from(path),
                    _ => unreachable!("a local outcome is always a directory resolution"),
                };
                Ok(Self { identity: local.identity, path, manifest: local.package, resolution: local.resolution })
            }
            FetchOutcome::Remote(handle) => {
                let manifest = handle.fetching_pkg.wait().await.map_err(unwrap_shared_error)?;
                handle.fetching_files.wait().await.map_err(unwrap_shared_error)?;
                handle.calculating_integrity.wait().await.map_err(unwrap_shared_error)?;
                Ok(Self {
                    identity: handle.identity,
                    path: handle.path,
                    manifest: Some(manifest),
                    resolution: handle.resolution,
                })
            }
        }
    }
}

/// What `fetchingFiles` settles with: the recorded integrity alongside
/// whether this call actually performed a fetch (`true`) or found the
/// files already published (`false`).
#[derive(Debug, Clone)]
pub struct FilesOutcome {
    /// The integrity recorded (or reused) for this entry.
    pub index: StoreIntegrity,
    /// Whether this particular settlement came from a fresh fetch.
    pub is_new: bool,
}

/// A local (`directory`) dependency: resolved and, if its manifest was
/// readable, described synchronously. There is nothing to coalesce or
/// await since directories bypass the store entirely.
#[derive(Debug, Clone)]
pub struct LocalDependency {
    /// The canonical identity.
    pub identity: PackageIdentity,
    /// Always a [`Resolution::Directory`].
    pub resolution: Resolution,
    /// The manifest, if the resolver could read it.
    pub package: Option<PackageManifest>,
    /// The `pref` normalized to a canonical form, if different from the input.
    pub normalized_pref: Option<String>,
}

/// A handle to a non-local fetch in flight (or already settled): the
/// manifest, the unpacked files, and the persisted integrity each settle
/// independently, and callers must not assume any ordering among them.
#[derive(Clone)]
pub struct FetchHandle {
    /// The canonical identity.
    pub identity: PackageIdentity,
    /// Where the package's content will be readable from once
    /// `fetching_files` settles successfully.
    pub path: PathBuf,
    /// Where the content comes from.
    pub resolution: Resolution,
    /// The latest available version, if the resolver tracked one.
    pub latest: Option<String>,
    /// The `pref` normalized to a canonical form, if different from the input.
    pub normalized_pref: Option<String>,
    /// Settles once the manifest is readable (pre-settled if the caller
    /// supplied one via [`FetchCoordinator::fetch_known`]).
    pub fetching_pkg: Completable<PackageManifest>,
    /// Settles once the unpacked files are published and safe to read.
    pub fetching_files: Completable<FilesOutcome>,
    /// Settles once `integrity.json` has been written (or immediately, if
    /// the cached record is being reused).
    pub calculating_integrity: Completable<()>,
}

/// What `resolveAndFetch`/`fetchKnown` return: a directory dependency
/// resolves synchronously, everything else hands back a [`FetchHandle`].
pub enum FetchOutcome {
    /// A local directory dependency, already fully resolved.
    Local(LocalDependency),
    /// A handle to a remote fetch's three independent futures.
    Remote(FetchHandle),
}

#[derive(Clone)]
struct LockerEntry {
    path: PathBuf,
    resolution: Resolution,
    latest: Option<String>,
    normalized_pref: Option<String>,
    fetching_pkg: Completable<PackageManifest>,
    fetching_files: Completable<FilesOutcome>,
    calculating_integrity: Completable<()>,
}

struct Inner {
    store_root: PathBuf,
    scheduler: RequestScheduler,
    resolvers: ResolverRegistry,
    fetchers: FetcherRegistry,
    index: Arc<dyn StoreIndex>,
    verifier: IntegrityVerifier,
    bus: ObservabilityBus,
    locker: DashMap<PackageIdentity, LockerEntry>,
}

/// Coordinates the full resolve -> fetch -> verify -> publish pipeline.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

impl FetchCoordinator {
    /// Assemble a coordinator from its collaborators.
    #[must_use]
    pub fn new(
        store_root: impl Into<PathBuf>,
        scheduler: RequestScheduler,
        resolvers: ResolverRegistry,
        fetchers: FetcherRegistry,
        index: Arc<dyn StoreIndex>,
        verifier: IntegrityVerifier,
        bus: ObservabilityBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store_root: store_root.into(),
                scheduler,
                resolvers,
                fetchers,
                index,
                verifier,
                bus,
                locker: DashMap::new(),
            }),
        }
    }

    /// Resolve a dependency preference and return a handle to its fetch,
    /// coalescing concurrent requests for the same resulting identity.
    pub async fn resolve_and_fetch(
        &self,
        wanted: &WantedDependency,
        resolve_opts: &ResolveOptions,
        verify_mode: VerifyMode,
    ) -> StoreResult<FetchOutcome> {
        self.inner.bus.emit(ProgressEvent::ResolvingContent { identity: wanted.pref.clone() });
        let resolved = match self.inner.resolvers.resolve(wanted, resolve_opts).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.inner.bus.emit(ProgressEvent::Error { identity: wanted.pref.clone(), message: e.to_string() });
                return Err(e);
            }
        };
        self.inner.bus.emit(ProgressEvent::Resolved { identity: resolved.identity.clone() });
        self.fetch_resolved(resolved, resolve_opts.offline, verify_mode)
    }

    /// Fetch a dependency whose resolution is already known (e.g. pinned
    /// by a lockfile), skipping the resolver registry entirely. Shares the
    /// same coalescing and staged-publish path as [`Self::resolve_and_fetch`].
    pub async fn fetch_known(
        &self,
        identity: PackageIdentity,
        resolution: Resolution,
        package: Option<PackageManifest>,
        offline: bool,
        verify_mode: VerifyMode,
    ) -> StoreResult<FetchOutcome> {
        let resolved = ResolvedDependency { identity, resolution, package, latest: None, normalized_pref: None };
        self.fetch_resolved(resolved, offline, verify_mode)
    }

    /// Consult (and, on miss, populate) the locker, then return a handle
    /// immediately. This never awaits anything beyond the synchronous
    /// check-and-insert, so no lock is ever held across a suspension
    /// point: the rest of the protocol runs in a spawned background task.
    fn fetch_resolved(
        &self,
        resolved: ResolvedDependency,
        offline: bool,
        verify_mode: VerifyMode,
    ) -> StoreResult<FetchOutcome> {
        // Local directories are linked, not fetched: there is nothing to
        // cache or coalesce, so the network/store pipeline is bypassed.
        if resolved.resolution.is_directory() {
            return Ok(FetchOutcome::Local(LocalDependency {
                identity: resolved.identity,
                resolution: resolved.resolution,
                package: resolved.package,
                normalized_pref: resolved.normalized_pref,
            }));
        }

        let identity = resolved.identity.clone();
        let rel = identity_to_path(&identity);
        let target = self.inner.store_root.join(&rel);
        let rel_str = rel.to_string_lossy().into_owned();
        let link_to_unpacked = target.join(LINK_NAME);

        let (entry, spawned_work) = match self.inner.locker.entry(identity.clone()) {
            LockerSlot::Occupied(existing) => (existing.get().clone(), None),
            LockerSlot::Vacant(vacant) => {
                let (pkg_completer, fetching_pkg) = Completer::new();
                let (files_completer, fetching_files) = Completer::new();
                let (integrity_completer, calculating_integrity) = Completer::new();
                let entry = LockerEntry {
                    path: link_to_unpacked.clone(),
                    resolution: resolved.resolution.clone(),
                    latest: resolved.latest.clone(),
                    normalized_pref: resolved.normalized_pref.clone(),
                    fetching_pkg,
                    fetching_files,
                    calculating_integrity,
                };
                vacant.insert(entry.clone());
                (entry, Some((pkg_completer, files_completer, integrity_completer)))
            }
        };

        if let Some((pkg_completer, files_completer, integrity_completer)) = spawned_work {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(Self::run_staged_fetch(
                inner,
                identity.clone(),
                resolved.resolution,
                resolved.package,
                rel_str,
                target,
                link_to_unpacked,
                offline,
                verify_mode,
                pkg_completer,
                files_completer,
                integrity_completer,
            ));
        }

        Ok(FetchOutcome::Remote(FetchHandle {
            identity,
            path: entry.path,
            resolution: entry.resolution,
            latest: entry.latest,
            normalized_pref: entry.normalized_pref,
            fetching_pkg: entry.fetching_pkg,
            fetching_files: entry.fetching_files,
            calculating_integrity: entry.calculating_integrity,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_staged_fetch(
        inner: Arc<Inner>,
        identity: PackageIdentity,
        resolution: Resolution,
        known_manifest: Option<PackageManifest>,
        rel_str: String,
        target: PathBuf,
        link_to_unpacked: PathBuf,
        offline: bool,
        verify_mode: VerifyMode,
        pkg_completer: Completer<PackageManifest>,
        files_completer: Completer<FilesOutcome>,
        integrity_completer: Completer<()>,
    ) {
        let mut pkg_completer = Some(pkg_completer);
        let mut integrity_completer = Some(integrity_completer);

        let result = Self::run_staged_fetch_inner(
            &inner,
            &identity,
            &resolution,
            known_manifest,
            &rel_str,
            &target,
            &link_to_unpacked,
            offline,
            verify_mode,
            &mut pkg_completer,
            &mut integrity_completer,
        )
        .await;

        match result {
            Ok(files_outcome) => files_completer.complete(files_outcome),
            Err(e) => {
                inner.bus.emit(ProgressEvent::Error { identity: identity.clone(), message: e.to_string() });
                let shared: SharedError = Arc::new(e);
                if let Some(completer) = pkg_completer.take() {
                    completer.fail(Arc::clone(&shared));
                }
                // `calculating_integrity` is simply dropped rather than
                // explicitly failed when it wasn't reached yet: per the
                // protocol it may remain pending, but a completer drop
                // still resolves any waiter (with a generic failure)
                // instead of leaving it hanging forever.
                drop(integrity_completer);
                files_completer.fail(shared);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_staged_fetch_inner(
        inner: &Arc<Inner>,
        identity: &PackageIdentity,
        resolution: &Resolution,
        known_manifest: Option<PackageManifest>,
        rel_str: &str,
        target: &Path,
        link_to_unpacked: &Path,
        offline: bool,
        verify_mode: VerifyMode,
        pkg_completer: &mut Option<Completer<PackageManifest>>,
        integrity_completer: &mut Option<Completer<()>>,
    ) -> StoreResult<FilesOutcome> {
        if is_present(inner.index.as_ref(), rel_str, link_to_unpacked).await {
            let verified = Self::check_cached(inner, target, link_to_unpacked, verify_mode);
            let manifest_read = match &known_manifest {
                Some(m) => Ok(m.clone()),
                None => PackageManifest::read_from_dir(link_to_unpacked),
            };

            match (verified, manifest_read) {
                (Ok(true), Ok(manifest)) => {
                    inner.bus.emit(ProgressEvent::FoundInStore { identity: identity.clone() });
                    if let Some(completer) = pkg_completer.take() {
                        completer.complete(manifest);
                    }
                    if let Some(completer) = integrity_completer.take() {
                        completer.complete(());
                    }
                    let recorded = StoreIntegrity::read(target.join(INTEGRITY_FILE_NAME))?;
                    return Ok(FilesOutcome { index: recorded, is_new: false });
                }
                (Ok(false), _) => {
                    tracing::warn!(%identity, "cached entry failed verification, refetching");
                }
                (Err(e), _) => {
                    tracing::warn!(%identity, error = %e, "could not read cached integrity record, refetching");
                }
                (Ok(true), Err(e)) => {
                    tracing::warn!(%identity, error = %e, "cached entry trusted but manifest unreadable, refetching");
                }
            }
        }

        if offline {
            return Err(StoreError::OfflineMiss { identity: identity.clone() });
        }

        Self::do_fetch_to_store(
            inner,
            identity,
            resolution,
            known_manifest,
            rel_str,
            target,
            verify_mode,
            pkg_completer,
            integrity_completer,
        )
        .await
    }

    fn check_cached(inner: &Inner, target: &Path, link_to_unpacked: &Path, verify_mode: VerifyMode) -> StoreResult<bool> {
        let recorded = StoreIntegrity::read(target.join(INTEGRITY_FILE_NAME))?;
        match verify_mode {
            VerifyMode::Fast => Ok(inner.verifier.verify_fast(&recorded)),
            VerifyMode::Strict => inner.verifier.verify_strict(link_to_unpacked, &recorded),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn do_fetch_to_store(
        inner: &Arc<Inner>,
        identity: &PackageIdentity,
        resolution: &Resolution,
        known_manifest: Option<PackageManifest>,
        rel_str: &str,
        target: &Path,
        verify_mode: VerifyMode,
        pkg_completer: &mut Option<Completer<PackageManifest>>,
        integrity_completer: &mut Option<Completer<()>>,
    ) -> StoreResult<FilesOutcome> {
        let stage = stage_path(target);
        if stage.exists() {
            std::fs::remove_dir_all(&stage)?;
        }

        // A prior entry occupies `target`: this is a refetch. Its
        // `node_modules` content is stale and gets replaced below, but
        // `packed.tgz`/`integrity.json` stay put until the new fetch
        // overwrites them, so a crash mid-refetch leaves the old entry
        // usable.
        let target_existed = target.exists();
        std::fs::create_dir_all(target)?;

        let counter = inner.scheduler.next_counter();
        let priority = rotate_priority(counter, inner.scheduler.concurrency() as u64);

        let fetch_opts = FetchOptions {
            ignore: None,
            generate_package_integrity: matches!(verify_mode, VerifyMode::Strict),
            identity: identity.clone(),
            packed_path: Some(target.join(PACKED_FILE_NAME)),
        };

        let node_modules_root = target.join("node_modules");
        let fetchers = &inner.fetchers;
        let stage_for_fetch = stage.clone();
        let resolution_for_fetch = resolution.clone();
        let cleanup_target = node_modules_root.clone();

        // The network fetch and the refetch-path cleanup of the stale
        // `node_modules` depend on nothing from each other, so they run
        // concurrently rather than one blocking on the other.
        let (outcome, cleanup) = tokio::join!(
            inner.scheduler.submit(priority, || async move {
                fetchers.fetch(&resolution_for_fetch, &stage_for_fetch, &fetch_opts).await
            }),
            async move {
                let result: StoreResult<()> = if target_existed && cleanup_target.exists() {
                    let joined = tokio::task::spawn_blocking(move || std::fs::remove_dir_all(&cleanup_target))
                        .await
                        .map_err(|e| StoreError::operation("refetch cleanup", e.to_string()))?;
                    joined.map_err(StoreError::from)
                } else {
                    Ok(())
                };
                result
            }
        );
        let outcome = outcome?;
        cleanup?;

        let manifest = match known_manifest {
            Some(m) => m,
            None => PackageManifest::read_from_dir(&stage)?,
        };
        if let Some(completer) = pkg_completer.take() {
            completer.complete(manifest.clone());
        }

        let unpacked = node_modules_root.join(&manifest.name);
        if let Some(parent) = unpacked.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&stage, &unpacked)?;

        let link_to_unpacked = target.join(LINK_NAME);
        replace_symlink(&Path::new("node_modules").join(&manifest.name), &link_to_unpacked)?;

        outcome.integrity.write_atomic(target.join(INTEGRITY_FILE_NAME))?;
        if let Some(completer) = integrity_completer.take() {
            completer.complete(());
        }

        let fetched_at = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        inner.index.record(rel_str, EntryMetadata { identity: identity.clone(), fetched_at }).await?;

        inner.bus.emit(ProgressEvent::Fetched { identity: identity.clone() });

        Ok(FilesOutcome { index: outcome.integrity, is_new: true })
    }
}

fn stage_path(target: &Path) -> PathBuf {
    let file_name = target.file_name().map_or_else(|| "entry".to_string(), |n| n.to_string_lossy().into_owned());
    target.with_file_name(format!("{file_name}_stage"))
}

/// Points `link` at `original` (a relative path), replacing whatever was
/// there before. `original` is stored relative so the store tree stays
/// self-contained if `store_root` is moved or copied wholesale.
fn replace_symlink(original: &Path, link: &Path) -> StoreResult<()> {
    if let Ok(meta) = std::fs::symlink_metadata(link) {
        if meta.is_dir() {
            std::fs::remove_dir_all(link)?;
        } else {
            std::fs::remove_file(link)?;
        }
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(original, link)?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_dir(original, link)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetchOptions as FO, Fetcher, FetcherOutcome};
    use crate::index::FileSystemStoreIndex;
    use crate::integrity::SsriIntegrityChecker;
    use crate::resolver::Resolver;
    use crate::unpack::UnpackResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTarballFetcher {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Fetcher for CountingTarballFetcher {
        fn type_tag(&self) -> &str {
            "tarball"
        }
        async fn fetch(&self, _resolution: &Resolution, target_dir: &Path, _opts: &FO) -> StoreResult<FetcherOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::create_dir_all(target_dir)?;
            std::fs::write(target_dir.join("package.json"), br#"{"name":"foo","version":"1.0.0"}"#)?;
            Ok(FetcherOutcome {
                unpacked: UnpackResult { files: vec![] },
                integrity: StoreIntegrity::Whole("sha512-abc".into()),
            })
        }
    }

    struct AlwaysTarball;
    #[async_trait]
    impl Resolver for AlwaysTarball {
        fn claims(&self, _wanted: &WantedDependency) -> bool {
            true
        }
        async fn resolve(&self, wanted: &WantedDependency, _opts: &ResolveOptions) -> StoreResult<ResolvedDependency> {
            Ok(ResolvedDependency {
                identity: wanted.pref.clone(),
                resolution: Resolution::Tarball { url: wanted.pref.clone(), integrity: None, registry: None },
                package: None,
                latest: None,
                normalized_pref: None,
            })
        }
    }

    fn make_coordinator(store_root: &Path, calls: Arc<AtomicUsize>) -> FetchCoordinator {
        let mut resolvers = ResolverRegistry::new();
        resolvers.register(Arc::new(AlwaysTarball));
        let mut fetchers = FetcherRegistry::new();
        fetchers.register(Arc::new(CountingTarballFetcher { calls }));
        let index = Arc::new(FileSystemStoreIndex::open(store_root.join("store-index.json")).unwrap());
        let verifier = IntegrityVerifier::new(Arc::new(SsriIntegrityChecker));
        FetchCoordinator::new(
            store_root,
            RequestScheduler::new(4),
            resolvers,
            fetchers,
            index,
            verifier,
            ObservabilityBus::new(),
        )
    }

    fn expect_remote(outcome: FetchOutcome) -> FetchHandle {
        match outcome {
            FetchOutcome::Remote(handle) => handle,
            FetchOutcome::Local(_) => panic!("expected a remote fetch handle"),
        }
    }

    #[tokio::test]
    async fn second_call_for_same_identity_reuses_the_locker_entry() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = make_coordinator(dir.path(), Arc::clone(&calls));
        let wanted = WantedDependency::new("https://example.com/foo-1.0.0.tgz");
        let opts = ResolveOptions { registry: "https://registry.npmjs.org".into(), offline: false };

        let first = expect_remote(coordinator.resolve_and_fetch(&wanted, &opts, VerifyMode::Fast).await.unwrap());
        let files = first.fetching_files.wait().await.unwrap();
        assert!(files.is_new);
        let manifest = first.fetching_pkg.wait().await.unwrap();
        assert_eq!(manifest.name, "foo");
        first.calculating_integrity.wait().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(first.path.join("package.json").exists());

        let second = expect_remote(coordinator.resolve_and_fetch(&wanted, &opts, VerifyMode::Fast).await.unwrap());
        second.fetching_files.wait().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second call should reuse the same locker entry, not refetch");
        assert_eq!(second.identity, first.identity);
    }

    #[tokio::test]
    async fn cache_hit_across_a_fresh_coordinator_skips_the_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let wanted = WantedDependency::new("https://example.com/foo-1.0.0.tgz");
        let opts = ResolveOptions { registry: "https://registry.npmjs.org".into(), offline: false };

        {
            let coordinator = make_coordinator(dir.path(), Arc::clone(&calls));
            let handle = expect_remote(coordinator.resolve_and_fetch(&wanted, &opts, VerifyMode::Fast).await.unwrap());
            handle.fetching_files.wait().await.unwrap();
        }

        // A brand-new coordinator has an empty locker, but still finds the
        // entry via the on-disk index and symlink, without refetching.
        let coordinator = make_coordinator(dir.path(), Arc::clone(&calls));
        let handle = expect_remote(coordinator.resolve_and_fetch(&wanted, &opts, VerifyMode::Fast).await.unwrap());
        let files = handle.fetching_files.wait().await.unwrap();
        assert!(!files.is_new);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "a fresh coordinator should hit the on-disk cache, not refetch");
    }

    #[tokio::test]
    async fn concurrent_requests_for_same_identity_coalesce() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = make_coordinator(dir.path(), Arc::clone(&calls));
        let opts = ResolveOptions { registry: "https://registry.npmjs.org".into(), offline: false };

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let opts = opts.clone();
            handles.push(tokio::spawn(async move {
                let wanted = WantedDependency::new("https://example.com/bar-1.0.0.tgz");
                let outcome = coordinator.resolve_and_fetch(&wanted, &opts, VerifyMode::Fast).await.unwrap();
                expect_remote(outcome).fetching_files.wait().await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1, "all concurrent requests should share one fetch");
    }

    #[tokio::test]
    async fn offline_with_no_cached_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = make_coordinator(dir.path(), calls);
        let wanted = WantedDependency::new("https://example.com/baz-1.0.0.tgz");
        let opts = ResolveOptions { registry: "https://registry.npmjs.org".into(), offline: true };

        let handle = expect_remote(coordinator.resolve_and_fetch(&wanted, &opts, VerifyMode::Fast).await.unwrap());
        let err = unwrap_shared_error(handle.fetching_files.wait().await.unwrap_err());
        assert!(matches!(err, StoreError::OfflineMiss { .. }));
    }

    #[tokio::test]
    async fn directory_resolution_bypasses_the_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"name": "local", "version": "1.0.0"}"#).unwrap();

        let store_root = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = make_coordinator(store_root.path(), calls);
        let wanted = WantedDependency::new(dir.path().to_string_lossy().into_owned());
        let opts = ResolveOptions { registry: "https://registry.npmjs.org".into(), offline: false };

        let fetched = coordinator.resolve_and_fetch(&wanted, &opts, VerifyMode::Fast).await.unwrap();
        match fetched {
            FetchOutcome::Local(local) => {
                assert!(matches!(local.resolution, Resolution::Directory { .. }));
                if let Resolution::Directory { path } = &local.resolution {
                    assert_eq!(Path::new(path), dir.path());
                }
            }
            FetchOutcome::Remote(_) => panic!("expected a local dependency"),
        }
    }

    #[tokio::test]
    async fn an_error_event_is_emitted_on_failure() {
        use crate::observability::ChannelObserver;

        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut resolvers = ResolverRegistry::new();
        resolvers.register(Arc::new(AlwaysTarball));
        let mut fetchers = FetcherRegistry::new();
        fetchers.register(Arc::new(CountingTarballFetcher { calls }));
        let index = Arc::new(FileSystemStoreIndex::open(dir.path().join("store-index.json")).unwrap());
        let verifier = IntegrityVerifier::new(Arc::new(SsriIntegrityChecker));
        let (observer, mut rx) = ChannelObserver::new();
        let mut bus = ObservabilityBus::new();
        bus.register(Arc::new(observer));
        let coordinator =
            FetchCoordinator::new(dir.path(), RequestScheduler::new(4), resolvers, fetchers, index, verifier, bus);

        let wanted = WantedDependency::new("https://example.com/offline-1.0.0.tgz");
        let opts = ResolveOptions { registry: "https://registry.npmjs.org".into(), offline: true };
        let handle = expect_remote(coordinator.resolve_and_fetch(&wanted, &opts, VerifyMode::Fast).await.unwrap());
        assert!(handle.fetching_files.wait().await.is_err());

        let mut saw_error_event = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ProgressEvent::Error { .. }) {
                saw_error_event = true;
            }
        }
        assert!(saw_error_event, "a failed fetch must emit a ProgressEvent::Error");
    }
}
