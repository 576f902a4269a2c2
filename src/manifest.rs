use crate::errors::{JitError, Result};
use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Version of the manifest format. Manifests written with another version
/// are ignored and trigger a full rebuild.
pub const MANIFEST_VERSION: u32 = 1;

/// Tracked state of one input file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub path: String,

    /// Content hash of the file when it was last built
    pub content_hash: ContentHash,

    /// File size in bytes
    pub size: u64,

    /// Modification time in milliseconds since the Unix epoch
    pub mtime: i64,

    /// Paths of files this file imports
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Classes found in the file
    #[serde(default)]
    pub classes: Vec<String>,
}

/// Persisted record of the last build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildManifest {
    pub version: u32,

    /// Hash of the sorted input path list
    pub cache_key: String,

    pub timestamp: DateTime<Utc>,

    pub files: IndexMap<String, ManifestEntry>,

    /// Stylesheet produced by the build, before header and minification
    #[serde(default)]
    pub css: String,
}

impl BuildManifest {
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            cache_key: String::new(),
            timestamp: Utc::now(),
            files: IndexMap::new(),
            css: String::new(),
        }
    }

    /// Load a manifest, returning `None` if the file is missing, unreadable,
    /// or from an incompatible version.
    ///
    /// This is fail-safe: any problem means a full rebuild.
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        let manifest: Self = match serde_json::from_str(&content) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!("ignoring unreadable manifest {}: {}", path.display(), e);
                return None;
            }
        };
        if !manifest.is_compatible() {
            tracing::info!(
                "manifest {} has version {}, expected {}; rebuilding",
                path.display(),
                manifest.version,
                MANIFEST_VERSION
            );
            return None;
        }
        Some(manifest)
    }

    /// Replace the manifest at `path` atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = self.to_pretty_json()?;
        crate::write_atomic(path, &json).map_err(|e| JitError::OutputError {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn is_compatible(&self) -> bool {
        self.version == MANIFEST_VERSION
    }

    /// Every class recorded across tracked files
    pub fn live_classes(&self) -> HashSet<String> {
        self.files
            .values()
            .flat_map(|entry| entry.classes.iter().cloned())
            .collect()
    }

    /// Tracked files whose dependency list contains `path`
    pub fn dependents_of<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.files
            .values()
            .filter(move |entry| entry.dependencies.iter().any(|dep| dep == path))
            .map(|entry| entry.path.as_str())
    }

    /// Cache key for a set of input paths; order does not matter
    pub fn compute_cache_key<I, S>(paths: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut paths: Vec<String> = paths.into_iter().map(|p| p.as_ref().to_string()).collect();
        paths.sort();
        ContentHash::from_str_content(&paths.join("\n")).to_string()
    }

    /// Convert to pretty JSON string
    pub fn to_pretty_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Convert to compact JSON string
    pub fn to_compact_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Default for BuildManifest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, deps: &[&str], classes: &[&str]) -> ManifestEntry {
        ManifestEntry {
            path: path.to_string(),
            content_hash: ContentHash::from_str_content(path),
            size: 10,
            mtime: 1_700_000_000_000,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_manifest_creation() {
        let manifest = BuildManifest::new();
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert!(manifest.files.is_empty());
        assert!(manifest.is_compatible());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("manifest.json");

        let mut manifest = BuildManifest::new();
        manifest.files.insert("a.html".into(), entry("a.html", &[], &["p-4"]));
        manifest.css = ".p-4 {}".into();
        manifest.save(&path).unwrap();

        let loaded = BuildManifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn test_load_is_fail_safe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        assert!(BuildManifest::load(&path).is_none());

        std::fs::write(&path, "not valid json {{{").unwrap();
        assert!(BuildManifest::load(&path).is_none());

        let mut old = BuildManifest::new();
        old.version = MANIFEST_VERSION + 1;
        std::fs::write(&path, old.to_compact_json().unwrap()).unwrap();
        assert!(BuildManifest::load(&path).is_none());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let mut json = serde_json::to_value(BuildManifest::new()).unwrap();
        json["addedLater"] = serde_json::json!({"x": 1});
        std::fs::write(&path, json.to_string()).unwrap();
        assert!(BuildManifest::load(&path).is_some());
    }

    #[test]
    fn test_cache_key_ignores_order() {
        assert_eq!(
            BuildManifest::compute_cache_key(["b", "a"]),
            BuildManifest::compute_cache_key(["a", "b"])
        );
        assert_ne!(
            BuildManifest::compute_cache_key(["a"]),
            BuildManifest::compute_cache_key(["a", "b"])
        );
    }

    #[test]
    fn test_live_classes_and_dependents() {
        let mut manifest = BuildManifest::new();
        manifest.files.insert("a.js".into(), entry("a.js", &["b.js"], &["flex"]));
        manifest.files.insert("b.js".into(), entry("b.js", &[], &["p-4", "flex"]));

        let live = manifest.live_classes();
        assert_eq!(live.len(), 2);
        assert_eq!(manifest.dependents_of("b.js").collect::<Vec<_>>(), vec!["a.js"]);
        assert_eq!(manifest.dependents_of("a.js").count(), 0);
    }
}
