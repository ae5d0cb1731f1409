//! Integrity recording and verification.
//!
//! `integrity.json` records either a single package-wide SRI string
//! (fast mode is enough to trust it) or a per-file index (needed for
//! strict mode, which recomputes digests from what's actually on disk).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Per-file integrity record used in strict mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileIntegrity {
    /// The SRI digest of the file's contents.
    pub integrity: String,
    /// Unix file mode bits.
    pub mode: u32,
    /// File size in bytes.
    pub size: u64,
}

/// The persisted shape of `integrity.json`: either a single package-wide
/// digest, or a per-relative-path index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreIntegrity {
    /// A single SRI string covering the whole package (fast mode).
    Whole(String),
    /// A per-file index (required for strict-mode recomputation).
    PerFile(HashMap<String, FileIntegrity>),
}

impl StoreIntegrity {
    /// Write this integrity record to `path` with no indentation, as an
    /// atomic rename from a sibling temp file so a crash mid-write never
    /// leaves a torn `integrity.json`.
    pub fn write_atomic(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_vec(self)?;
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read a previously recorded integrity file.
    pub fn read(path: impl AsRef<Path>) -> StoreResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Computes and checks subresource-integrity digests.
///
/// Implementations must be safe to share across concurrent fetches;
/// the default uses the `ssri` crate's SHA-512-based digests.
pub trait IntegrityChecker: Send + Sync {
    /// Compute the SRI digest of `data`.
    fn generate(&self, data: &[u8]) -> String;

    /// Verify that `data` matches `expected`, an SRI string.
    fn check(&self, data: &[u8], expected: &str) -> StoreResult<()>;
}

/// Default [`IntegrityChecker`] backed by the `ssri` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SsriIntegrityChecker;

impl IntegrityChecker for SsriIntegrityChecker {
    fn generate(&self, data: &[u8]) -> String {
        ssri::Integrity::from(data).to_string()
    }

    fn check(&self, data: &[u8], expected: &str) -> StoreResult<()> {
        let expected: ssri::Integrity =
            expected.parse().map_err(|_| StoreError::IntegrityMismatch { path: None })?;
        expected.check(data).map_err(|_| StoreError::IntegrityMismatch { path: None })?;
        Ok(())
    }
}

/// Decides whether a store entry on disk is still trustworthy.
pub struct IntegrityVerifier {
    checker: std::sync::Arc<dyn IntegrityChecker>,
}

impl IntegrityVerifier {
    /// Build a verifier around a given checker implementation.
    #[must_use]
    pub fn new(checker: std::sync::Arc<dyn IntegrityChecker>) -> Self {
        Self { checker }
    }

    /// Fast mode: accept the persisted record without touching the disk
    /// beyond what the caller already confirmed exists.
    #[must_use]
    pub fn verify_fast(&self, recorded: &StoreIntegrity) -> bool {
        matches!(recorded, StoreIntegrity::Whole(_) | StoreIntegrity::PerFile(_))
            && match recorded {
                StoreIntegrity::PerFile(files) => !files.is_empty(),
                StoreIntegrity::Whole(s) => !s.is_empty(),
            }
    }

    /// Strict mode: walk `dir` and recompute a digest per file, comparing
    /// against `recorded`. Any mismatch, missing file, or unexpected
    /// extra file makes the entry untrusted.
    pub fn verify_strict(&self, dir: impl AsRef<Path>, recorded: &StoreIntegrity) -> StoreResult<bool> {
        let StoreIntegrity::PerFile(expected) = recorded else {
            // A whole-package digest can't be recomputed file-by-file;
            // strict mode on such an entry can only refetch.
            return Ok(false);
        };

        for (rel_path, file_integrity) in expected {
            let full_path = dir.as_ref().join(rel_path);
            let Ok(data) = std::fs::read(&full_path) else {
                return Ok(false);
            };
            if self.checker.check(&data, &file_integrity.integrity).is_err() {
                return Ok(false);
            }
        }

        let root = dir.as_ref();
        for entry in walkdir::WalkDir::new(root).follow_links(true) {
            let entry = entry.map_err(|e| StoreError::operation("strict verify", e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path()).to_string_lossy().replace('\\', "/");
            if !expected.contains_key(rel.as_str()) {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ssri_checker_round_trips() {
        let checker = SsriIntegrityChecker;
        let digest = checker.generate(b"hello world");
        assert!(checker.check(b"hello world", &digest).is_ok());
        assert!(checker.check(b"goodbye world", &digest).is_err());
    }

    #[test]
    fn fast_mode_trusts_nonempty_record() {
        let verifier = IntegrityVerifier::new(Arc::new(SsriIntegrityChecker));
        assert!(verifier.verify_fast(&StoreIntegrity::Whole("sha512-abc".into())));
        assert!(!verifier.verify_fast(&StoreIntegrity::Whole(String::new())));
    }

    #[test]
    fn strict_mode_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.js"), b"module.exports = 1;").unwrap();

        let checker = SsriIntegrityChecker;
        let digest = checker.generate(b"module.exports = 1;");
        let mut files = HashMap::new();
        files.insert("index.js".to_string(), FileIntegrity { integrity: digest, mode: 0o644, size: 19 });
        let recorded = StoreIntegrity::PerFile(files);

        let verifier = IntegrityVerifier::new(Arc::new(SsriIntegrityChecker));
        assert!(verifier.verify_strict(dir.path(), &recorded).unwrap());

        std::fs::write(dir.path().join("index.js"), b"tampered").unwrap();
        assert!(!verifier.verify_strict(dir.path(), &recorded).unwrap());
    }

    #[test]
    fn write_atomic_round_trips() {
        use pretty_assertions::assert_eq;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrity.json");
        let recorded = StoreIntegrity::Whole("sha512-xyz".into());
        recorded.write_atomic(&path).unwrap();
        assert_eq!(StoreIntegrity::read(&path).unwrap(), recorded);
    }

    #[test]
    fn strict_mode_detects_an_unexpected_extra_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.js"), b"module.exports = 1;").unwrap();

        let checker = SsriIntegrityChecker;
        let digest = checker.generate(b"module.exports = 1;");
        let mut files = HashMap::new();
        files.insert("index.js".to_string(), FileIntegrity { integrity: digest, mode: 0o644, size: 19 });
        let recorded = StoreIntegrity::PerFile(files);

        let verifier = IntegrityVerifier::new(Arc::new(SsriIntegrityChecker));
        assert!(verifier.verify_strict(dir.path(), &recorded).unwrap());

        // A file dropped in after the record was written isn't accounted for
        // and must not be silently trusted.
        std::fs::write(dir.path().join("extra.js"), b"sneaked in").unwrap();
        assert!(!verifier.verify_strict(dir.path(), &recorded).unwrap());
    }
}
