//! End-to-end coverage of the public `PackageStore` surface: a real
//! (mocked) HTTP server, a real filesystem store root, no internal APIs.

use std::io::Write;

use pkgstore::wanted::WantedDependency;
use pkgstore::VerifyMode;

fn make_tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *contents).unwrap();
    }
    let tar_bytes = builder.into_inner().unwrap();
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn fresh_install_then_cache_hit() {
    let tarball = make_tarball(&[("package/package.json", br#"{"name":"left-pad","version":"1.0.0"}"#)]);

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/left-pad-1.0.0.tgz")
        .with_status(200)
        .with_header("content-length", &tarball.len().to_string())
        .with_body(&tarball)
        .expect(1)
        .create_async()
        .await;

    let store_dir = tempfile::tempdir().unwrap();
    let store = pkgstore::PackageStore::builder(store_dir.path()).build().unwrap();

    let wanted = WantedDependency::new(format!("{}/left-pad-1.0.0.tgz", server.url()));

    let first = store.fetch(&wanted, false, VerifyMode::Fast).await.unwrap();
    assert!(first.path.join("package.json").exists());

    // Second fetch must be served from the store, not the network: the
    // mock above only expects exactly one call.
    let second = store.fetch(&wanted, false, VerifyMode::Fast).await.unwrap();
    assert_eq!(second.identity, first.identity);

    mock.assert_async().await;
}

#[tokio::test]
async fn offline_fetch_with_no_cached_entry_fails() {
    let store_dir = tempfile::tempdir().unwrap();
    let store = pkgstore::PackageStore::builder(store_dir.path()).build().unwrap();

    let wanted = WantedDependency::new("https://registry.example.com/never-cached-1.0.0.tgz");
    let err = store.fetch(&wanted, true, VerifyMode::Fast).await.unwrap_err();
    assert!(matches!(err, pkgstore::error::StoreError::OfflineMiss { .. }));
}

#[tokio::test]
async fn tampered_entry_is_refetched_under_strict_verification() {
    let tarball = make_tarball(&[("package/package.json", br#"{"name":"foo","version":"2.0.0"}"#)]);

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/foo-2.0.0.tgz")
        .with_status(200)
        .with_header("content-length", &tarball.len().to_string())
        .with_body(&tarball)
        .expect(2)
        .create_async()
        .await;

    let store_dir = tempfile::tempdir().unwrap();
    let store = pkgstore::PackageStore::builder(store_dir.path()).build().unwrap();
    let wanted = WantedDependency::new(format!("{}/foo-2.0.0.tgz", server.url()));

    let first = store.fetch(&wanted, false, VerifyMode::Strict).await.unwrap();
    std::fs::write(first.path.join("package.json"), b"tampered").unwrap();

    // A process-wide fetch never repeats for an identity it already
    // settled, so tamper detection is exercised through a second store
    // instance (a fresh locker, the same on-disk store root) rather than
    // a second call against the same `store`.
    let reopened = pkgstore::PackageStore::builder(store_dir.path()).build().unwrap();
    let second = reopened.fetch(&wanted, false, VerifyMode::Strict).await.unwrap();
    let contents = std::fs::read_to_string(second.path.join("package.json")).unwrap();
    assert!(contents.contains("foo"));

    mock.assert_async().await;
}

#[tokio::test]
async fn directory_dependency_is_linked_without_any_network_access() {
    let local_pkg = tempfile::tempdir().unwrap();
    std::fs::write(local_pkg.path().join("package.json"), r#"{"name": "local-pkg", "version": "1.0.0"}"#).unwrap();

    let store_dir = tempfile::tempdir().unwrap();
    let store = pkgstore::PackageStore::builder(store_dir.path()).build().unwrap();

    let wanted = WantedDependency::new(local_pkg.path().to_string_lossy().into_owned());
    let fetched = store.fetch(&wanted, false, VerifyMode::Fast).await.unwrap();

    assert_eq!(fetched.path, local_pkg.path());
    assert_eq!(fetched.manifest.unwrap().name, "local-pkg");
}
