//! The caller-facing request to resolve a dependency.

use serde::{Deserialize, Serialize};

/// A declared dependency before resolution: a name/version range, git
/// URL, local path, or tarball URL, paired with the caller's preferred
/// alias. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WantedDependency {
    /// The caller's preferred name for this dependency, if it differs
    /// from the name discovered during resolution.
    pub alias: Option<String>,
    /// An opaque reference string: a semver range, a `git+https://...`
    /// URL, a filesystem path, or a tarball URL. Interpreted by whichever
    /// resolver claims it.
    pub pref: String,
}

impl WantedDependency {
    /// Construct a wanted dependency with no alias override.
    #[must_use]
    pub fn new(pref: impl Into<String>) -> Self {
        Self { alias: None, pref: pref.into() }
    }

    /// Construct a wanted dependency with an explicit alias.
    #[must_use]
    pub fn aliased(alias: impl Into<String>, pref: impl Into<String>) -> Self {
        Self { alias: Some(alias.into()), pref: pref.into() }
    }
}
