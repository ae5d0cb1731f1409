//! Streaming tarball unpacking into a staging directory.

use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;

use crate::error::{StoreError, StoreResult};

/// One file materialized by an [`Unpacker`], recorded for the per-file
/// integrity index and the store index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedFile {
    /// Path relative to the package root.
    pub path: String,
    /// Unix file mode bits.
    pub mode: u32,
    /// File size in bytes.
    pub size: u64,
}

/// The result of unpacking a tarball: every file written, in the order
/// the archive listed them.
#[derive(Debug, Clone, Default)]
pub struct UnpackResult {
    /// Files written under the target directory.
    pub files: Vec<UnpackedFile>,
}

/// A predicate deciding whether an archive entry should be skipped.
pub type IgnorePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Unpacks a fetched tarball into a target directory.
///
/// Implementations receive the whole tarball in memory — the HTTP
/// client buffers the download so the same bytes can be teed into the
/// integrity checker, the cached-tarball writer, and the unpacker
/// without racing a partially-received stream.
#[async_trait]
pub trait Unpacker: Send + Sync {
    /// Unpack `data` (a `.tgz`/`.tar.gz` archive) into `target_dir`,
    /// skipping entries for which `ignore` returns `true`.
    async fn unpack(
        &self,
        data: Bytes,
        target_dir: &Path,
        ignore: Option<IgnorePredicate>,
    ) -> StoreResult<UnpackResult>;
}

/// Default [`Unpacker`] for gzip-compressed tarballs, the layout every
/// built-in tarball/git fetcher produces.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarGzUnpacker;

impl TarGzUnpacker {
    fn unpack_blocking(
        data: Bytes,
        target_dir: PathBuf,
        ignore: Option<IgnorePredicate>,
    ) -> StoreResult<UnpackResult> {
        std::fs::create_dir_all(&target_dir)?;

        let decoder = GzDecoder::new(Cursor::new(data));
        let mut archive = tar::Archive::new(decoder);
        archive.set_preserve_permissions(true);

        let mut files = Vec::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let raw_path = entry.path()?.into_owned();

            if raw_path.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir)) {
                return Err(StoreError::operation("unpack", format!("unsafe archive entry path: {}", raw_path.display())));
            }

            // npm tarballs wrap their content in a single top-level
            // `package/` directory; strip it so the store entry root holds
            // the package contents directly.
            let stripped = strip_leading_component(&raw_path);
            if stripped.as_os_str().is_empty() {
                continue;
            }
            let rel_path = stripped.to_string_lossy().into_owned();

            if let Some(ignore) = &ignore {
                if ignore(&rel_path) {
                    continue;
                }
            }

            if entry.header().entry_type().is_dir() {
                std::fs::create_dir_all(target_dir.join(&stripped))?;
                continue;
            }

            let mode = entry.header().mode().unwrap_or(0o644);
            let size = entry.header().size().unwrap_or(0);
            let dest = target_dir.join(&stripped);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry.unpack(&dest)?;

            files.push(UnpackedFile { path: rel_path, mode, size });
        }

        Ok(UnpackResult { files })
    }
}

/// Strips the leading `package/` directory npm wraps every tarball entry
/// in. Entries that don't start with it are left untouched.
fn strip_leading_component(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(first) if first.as_os_str() == "package" => components.as_path().to_path_buf(),
        _ => path.to_path_buf(),
    }
}

#[async_trait]
impl Unpacker for TarGzUnpacker {
    async fn unpack(
        &self,
        data: Bytes,
        target_dir: &Path,
        ignore: Option<IgnorePredicate>,
    ) -> StoreResult<UnpackResult> {
        let target_dir = target_dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::unpack_blocking(data, target_dir, ignore))
            .await
            .map_err(|e| StoreError::operation("unpack", e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_tarball(files: &[(&str, &[u8])]) -> Bytes {
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
        Bytes::from(encoder.finish().unwrap())
    }

    #[tokio::test]
    async fn unpacks_every_file() {
        let data = make_tarball(&[("package/package.json", b"{}"), ("package/index.js", b"module.exports = 1;")]);
        let dir = tempfile::tempdir().unwrap();

        let result = TarGzUnpacker.unpack(data, dir.path(), None).await.unwrap();

        assert_eq!(result.files.len(), 2);
        assert!(dir.path().join("package.json").exists());
        assert!(dir.path().join("index.js").exists());
    }

    #[tokio::test]
    async fn archive_with_no_package_wrapper_is_left_unstripped() {
        let data = make_tarball(&[("lib.js", b"module.exports = 1;")]);
        let dir = tempfile::tempdir().unwrap();

        let result = TarGzUnpacker.unpack(data, dir.path(), None).await.unwrap();

        assert_eq!(result.files.len(), 1);
        assert!(dir.path().join("lib.js").exists());
    }

    #[tokio::test]
    async fn honors_ignore_predicate() {
        let data = make_tarball(&[("package/package.json", b"{}"), ("package/.DS_Store", b"junk")]);
        let dir = tempfile::tempdir().unwrap();

        let ignore: IgnorePredicate = Arc::new(|path: &str| path.ends_with(".DS_Store"));
        let result = TarGzUnpacker.unpack(data, dir.path(), Some(ignore)).await.unwrap();

        assert_eq!(result.files.len(), 1);
        assert!(!dir.path().join(".DS_Store").exists());
    }
}
