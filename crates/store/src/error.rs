//! Error types for the package store.
//!
//! Every fallible operation in this crate returns a [`StoreError`], built
//! with `thiserror` so the variants carry the context needed for a caller
//! (or a structured log line) to act on them without re-deriving it.

use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type StoreResult<T> = Result<T, StoreError>;

/// All error conditions the store can surface.
///
/// `StoreCorruption` is deliberately *not* meant to reach a caller in
/// normal operation — the fetch coordinator catches it internally and
/// triggers a refetch (see [`crate::coordinator`]). It remains a variant
/// here because a refetch can itself fail, at which point the corruption
/// reason is worth preserving in the final error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No fetcher (or resolver) is registered for this resolution/dependency type.
    #[error("unsupported resolution type: {type_tag}")]
    UnsupportedResolution {
        /// The `type` tag that had no registered handler.
        type_tag: String,
    },

    /// A downloaded tarball's size did not match `content-length`.
    #[error("tarball size mismatch for {url}: expected {expected:?}, received {received}")]
    BadTarball {
        /// The advertised size, if the server sent `content-length`.
        expected: Option<u64>,
        /// The number of bytes actually received.
        received: u64,
        /// The URL that was being downloaded.
        url: String,
    },

    /// A subresource-integrity check failed against the recorded digest.
    #[error("integrity mismatch{}", path.as_deref().map(|p| format!(" for {p}")).unwrap_or_default())]
    IntegrityMismatch {
        /// The file within the package that failed verification, if known.
        path: Option<String>,
    },

    /// A transport-level failure occurred while talking to a registry or tarball host.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The store is offline and the requested identity was not already cached.
    #[error("offline and no cached entry for {identity}")]
    OfflineMiss {
        /// The identity that could not be resolved offline.
        identity: String,
    },

    /// A local (`directory`) dependency had no readable `package.json`.
    #[error("missing package manifest at {}", path.display())]
    MissingManifest {
        /// The path where a manifest was expected.
        path: PathBuf,
    },

    /// An on-disk store entry failed strict verification.
    ///
    /// The coordinator recovers from this by refetching; it is not meant
    /// to be surfaced to callers, but a refetch that itself fails wraps
    /// its underlying error around this variant for diagnostics.
    #[error("store entry for {identity} is corrupt: {reason}")]
    StoreCorruption {
        /// The identity whose on-disk entry failed verification.
        identity: String,
        /// Human-readable reason (e.g. which file, or a count of files).
        reason: String,
    },

    /// A resolver reported failure while resolving a dependency.
    #[error("resolver {resolver} failed: {source}")]
    ResolverFailure {
        /// The name of the resolver that failed.
        resolver: String,
        /// The underlying error.
        #[source]
        source: Box<StoreError>,
    },

    /// All retry attempts for a network operation were exhausted.
    #[error("{resource} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// The number of attempts made, including the first.
        attempts: u32,
        /// The resource (typically a URL) being fetched.
        resource: String,
        /// The last error observed.
        #[source]
        source: Box<StoreError>,
    },

    /// An I/O failure while staging, unpacking, or publishing a store entry.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure decoding or encoding JSON (manifests, the store index, `integrity.json`).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid store configuration.
    #[error("invalid store configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// A well-formed but unusable `WantedDependency.pref`.
    #[error("bad dependency preference '{pref}': {reason}")]
    BadPref {
        /// The offending preference string.
        pref: String,
        /// Why it could not be used.
        reason: String,
    },

    /// No resolver claimed a `WantedDependency`.
    #[error("no resolver could handle preference '{pref}'")]
    NotFound {
        /// The preference string nothing could resolve.
        pref: String,
    },

    /// A generic operation failure with free-form context, used sparingly
    /// for conditions that don't warrant their own variant.
    #[error("{operation} failed: {reason}")]
    Operation {
        /// The operation that failed.
        operation: String,
        /// The reason for failure.
        reason: String,
    },
}

impl StoreError {
    /// Whether this error is the kind the HTTP client should retry:
    /// server errors, connection drops, timeouts, and size mismatches are
    /// retryable; everything else is not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BadTarball { .. } => true,
            Self::Network(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Construct an [`StoreError::Operation`] with context.
    #[must_use]
    pub fn operation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Operation { operation: operation.into(), reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_tarball_is_retryable() {
        let err = StoreError::BadTarball { expected: Some(10), received: 5, url: "x".into() };
        assert!(err.is_retryable());
    }

    #[test]
    fn offline_miss_is_not_retryable() {
        let err = StoreError::OfflineMiss { identity: "foo@1.0.0".into() };
        assert!(!err.is_retryable());
    }

    #[test]
    fn integrity_mismatch_formats_with_and_without_path() {
        let with_path = StoreError::IntegrityMismatch { path: Some("lib/index.js".into()) };
        assert!(with_path.to_string().contains("lib/index.js"));

        let without_path = StoreError::IntegrityMismatch { path: None };
        assert!(!without_path.to_string().contains("for"));
    }
}
