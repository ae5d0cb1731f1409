//! The parsed package manifest (`package.json`).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// The parsed manifest of a resolved package. Immutable after read; the
/// store never mutates a manifest once a fetch has surfaced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// The package name.
    pub name: String,
    /// The package version.
    pub version: String,
    /// Declared runtime dependencies.
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
    /// Any manifest fields not modeled above, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PackageManifest {
    /// Read and parse a manifest from `<dir>/package.json`.
    pub fn read_from_dir(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let path = dir.as_ref().join("package.json");
        let contents = std::fs::read_to_string(&path).map_err(|_| StoreError::MissingManifest { path: path.clone() })?;
        let manifest = serde_json::from_str(&contents)?;
        Ok(manifest)
    }
}
