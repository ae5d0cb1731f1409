//! Where to obtain a resolved package's content from.

use std::collections::HashMap;

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Tagged description of where a resolved package's bytes come from.
///
/// Built-in variants cover the common cases; `Custom` is the escape
/// hatch consumed by externally-registered resolvers/fetchers, dispatched
/// by `type_tag`. Serialized as a JSON object with a `type` field, hand
/// rolled rather than derived because the open-ended `Custom` variant
/// doesn't fit serde's internally-tagged derive.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A downloadable tarball.
    Tarball {
        /// The URL to download.
        url: String,
        /// Expected subresource integrity, if known ahead of time.
        integrity: Option<String>,
        /// The registry this tarball was resolved against, used for auth scoping.
        registry: Option<String>,
    },
    /// A git repository pinned to a commit.
    Git {
        /// The repository URL.
        repo: String,
        /// The resolved commit hash.
        commit: String,
    },
    /// A local filesystem path, linked rather than fetched.
    Directory {
        /// The path to the package's content, relative to the process's
        /// working directory or absolute.
        path: String,
    },
    /// Any resolution type registered by a caller-supplied resolver/fetcher
    /// pair, not known to this crate.
    Custom {
        /// The dispatch key used to find a registered fetcher.
        type_tag: String,
        /// Opaque fields interpreted only by that fetcher.
        fields: HashMap<String, serde_json::Value>,
    },
}

impl Resolution {
    /// The dispatch key used to find a fetcher, defaulting to `"tarball"`
    /// when unspecified (matching the historical default of the systems
    /// this design is adapted from).
    #[must_use]
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Tarball { .. } => "tarball",
            Self::Git { .. } => "git",
            Self::Directory { .. } => "directory",
            Self::Custom { type_tag, .. } => type_tag,
        }
    }

    /// Whether this resolution bypasses the network fetch pipeline
    /// entirely (the local-directory shortcut).
    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }
}

impl Serialize for Resolution {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serde_json::Map::new();
        match self {
            Self::Tarball { url, integrity, registry } => {
                map.insert("type".into(), "tarball".into());
                map.insert("url".into(), url.clone().into());
                if let Some(integrity) = integrity {
                    map.insert("integrity".into(), integrity.clone().into());
                }
                if let Some(registry) = registry {
                    map.insert("registry".into(), registry.clone().into());
                }
            }
            Self::Git { repo, commit } => {
                map.insert("type".into(), "git".into());
                map.insert("repo".into(), repo.clone().into());
                map.insert("commit".into(), commit.clone().into());
            }
            Self::Directory { path } => {
                map.insert("type".into(), "directory".into());
                map.insert("path".into(), path.clone().into());
            }
            Self::Custom { type_tag, fields } => {
                map.insert("type".into(), type_tag.clone().into());
                for (k, v) in fields {
                    map.insert(k.clone(), v.clone());
                }
            }
        }
        serde_json::Value::Object(map).serialize(serializer).map_err(S::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut value = serde_json::Map::deserialize(deserializer)?;
        let type_tag = value
            .remove("type")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| D::Error::missing_field("type"))?;

        let take_string = |value: &mut serde_json::Map<String, serde_json::Value>, key: &str| {
            value.remove(key).and_then(|v| v.as_str().map(str::to_string))
        };

        let resolution = match type_tag.as_str() {
            "tarball" => Self::Tarball {
                url: take_string(&mut value, "url").ok_or_else(|| D::Error::missing_field("url"))?,
                integrity: take_string(&mut value, "integrity"),
                registry: take_string(&mut value, "registry"),
            },
            "git" => Self::Git {
                repo: take_string(&mut value, "repo").ok_or_else(|| D::Error::missing_field("repo"))?,
                commit: take_string(&mut value, "commit").ok_or_else(|| D::Error::missing_field("commit"))?,
            },
            "directory" => Self::Directory {
                path: take_string(&mut value, "path").ok_or_else(|| D::Error::missing_field("path"))?,
            },
            other => Self::Custom { type_tag: other.to_string(), fields: value.into_iter().collect() },
        };
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tarball_type_tag_is_tarball() {
        let resolution = Resolution::Tarball { url: "https://x/y.tgz".into(), integrity: None, registry: None };
        assert_eq!(resolution.type_tag(), "tarball");
    }

    #[test]
    fn directory_is_detected() {
        let resolution = Resolution::Directory { path: "/tmp/pkg".into() };
        assert!(resolution.is_directory());
        assert!(!Resolution::Git { repo: "x".into(), commit: "y".into() }.is_directory());
    }

    #[test]
    fn tarball_round_trips_through_json() {
        let resolution =
            Resolution::Tarball { url: "https://x/y.tgz".into(), integrity: Some("sha512-abc".into()), registry: None };
        let json = serde_json::to_string(&resolution).unwrap();
        let back: Resolution = serde_json::from_str(&json).unwrap();
        assert_eq!(resolution, back);
    }

    #[test]
    fn unknown_type_becomes_custom() {
        let json = r#"{"type": "npm-alias", "target": "left-pad@1.0.0"}"#;
        let resolution: Resolution = serde_json::from_str(json).unwrap();
        match resolution {
            Resolution::Custom { type_tag, fields } => {
                assert_eq!(type_tag, "npm-alias");
                assert_eq!(fields.get("target").and_then(|v| v.as_str()), Some("left-pad@1.0.0"));
            }
            _ => panic!("expected Custom"),
        }
    }
}
