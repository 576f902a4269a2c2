//! Incremental builds driven by a persisted [`BuildManifest`].
//!
//! A build is planned by hashing the current inputs and diffing them against
//! the manifest, then applied by merging the CSS of the rebuilt files into
//! the previous stylesheet.

use crate::errors::{JitError, Result};
use crate::hash::ContentHash;
use crate::manifest::{BuildManifest, ManifestEntry};
use crate::regex_cache::RegexCache;
use crate::stylesheet::{merge_css, tree_shake};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct IncrementalOptions {
    pub manifest_path: PathBuf,
    /// Compare content hashes; when false only mtime and size are compared
    pub hash_content: bool,
    /// Drop CSS for classes no tracked file uses any more
    pub tree_shake: bool,
    /// Write the manifest after each build; off for dry runs
    pub persist: bool,
}

/// Current state of one input file
#[derive(Debug, Clone)]
pub struct FileState {
    pub path: PathBuf,
    pub content_hash: Option<ContentHash>,
    pub size: u64,
    pub mtime: i64,
}

/// Classification of the inputs for one build
#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    /// Unchanged files rebuilt because something they import changed
    pub dependents: Vec<String>,
    /// Files to rebuild, in input order
    pub to_rebuild: Vec<String>,
    files: IndexMap<String, FileState>,
    had_previous: bool,
}

impl BuildPlan {
    pub fn needs_rebuild(&self, key: &str) -> bool {
        self.to_rebuild.iter().any(|k| k == key)
    }

    /// Paths of the files to rebuild
    pub fn rebuild_paths(&self) -> Vec<PathBuf> {
        self.to_rebuild
            .iter()
            .filter_map(|key| self.files.get(key).map(|state| state.path.clone()))
            .collect()
    }

    /// Number of input files that currently exist
    pub fn total_files(&self) -> usize {
        self.files.len()
    }
}

/// What the build function produces for one file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileOutput {
    pub classes: Vec<String>,
    pub css: String,
    /// Keys of files this file imports
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    pub rebuilt_files: Vec<String>,
    /// Files whose build function failed, with the error message
    pub failed_files: Vec<(String, String)>,
    /// A previous manifest existed and not every file was rebuilt
    pub incremental: bool,
    pub css: String,
    pub manifest: BuildManifest,
}

pub struct IncrementalBuilder {
    options: IncrementalOptions,
    regex_cache: Arc<RegexCache>,
    previous: Option<BuildManifest>,
}

impl IncrementalBuilder {
    /// Create a builder seeded from the manifest at `options.manifest_path`
    pub fn new(options: IncrementalOptions, regex_cache: Arc<RegexCache>) -> Self {
        let previous = BuildManifest::load(&options.manifest_path);
        if previous.is_none() {
            tracing::info!("no usable manifest at {}; full build", options.manifest_path.display());
        }
        Self {
            options,
            regex_cache,
            previous,
        }
    }

    /// Forget the previous build so the next one rebuilds everything
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn previous(&self) -> Option<&BuildManifest> {
        self.previous.as_ref()
    }

    pub fn options(&self) -> &IncrementalOptions {
        &self.options
    }

    /// Classify `files` against the previous manifest
    pub fn plan(&self, files: &[PathBuf]) -> BuildPlan {
        let previous = self.previous.as_ref();
        let hash_content = self.options.hash_content;

        let states: Vec<(String, FileState)> = files
            .par_iter()
            .filter_map(|path| {
                let key = path_key(path);
                let prev = previous.and_then(|m| m.files.get(&key));
                match inspect_file(path, hash_content, prev) {
                    Ok(state) => Some((key, state)),
                    Err(e) => {
                        tracing::debug!("skipping {}: {}", path.display(), e);
                        None
                    }
                }
            })
            .collect();

        let mut plan = BuildPlan {
            had_previous: previous.is_some(),
            ..BuildPlan::default()
        };
        for (key, state) in states {
            plan.files.entry(key).or_insert(state);
        }

        for (key, state) in &plan.files {
            match previous.and_then(|m| m.files.get(key)) {
                None => plan.added.push(key.clone()),
                Some(entry) => {
                    let changed = match state.content_hash {
                        Some(hash) if hash_content => hash != entry.content_hash,
                        _ => entry.mtime != state.mtime || entry.size != state.size,
                    };
                    if changed {
                        plan.modified.push(key.clone());
                    } else {
                        plan.unchanged.push(key.clone());
                    }
                }
            }
        }

        if let Some(previous) = previous {
            plan.deleted = previous
                .files
                .keys()
                .filter(|key| !plan.files.contains_key(*key))
                .cloned()
                .collect();
        }

        let changed: HashSet<&str> = plan
            .added
            .iter()
            .chain(&plan.modified)
            .chain(&plan.deleted)
            .map(String::as_str)
            .collect();
        if let Some(previous) = previous {
            plan.dependents = plan
                .unchanged
                .iter()
                .filter(|key| {
                    previous.files.get(*key).is_some_and(|entry| {
                        entry.dependencies.iter().any(|dep| changed.contains(dep.as_str()))
                    })
                })
                .cloned()
                .collect();
        }
        plan.unchanged.retain(|key| !plan.dependents.contains(key));

        let rebuild: HashSet<&String> = plan.added.iter().chain(&plan.modified).chain(&plan.dependents).collect();
        plan.to_rebuild = plan.files.keys().filter(|key| rebuild.contains(key)).cloned().collect();

        tracing::debug!(
            "plan: {} added, {} modified, {} deleted, {} unchanged, {} dependents",
            plan.added.len(),
            plan.modified.len(),
            plan.deleted.len(),
            plan.unchanged.len(),
            plan.dependents.len()
        );
        plan
    }

    /// Fold build outputs into a new manifest and stylesheet, and persist the
    /// manifest. Files whose output is an error are logged and left out.
    pub fn apply(&mut self, plan: BuildPlan, outputs: Vec<(String, Result<FileOutput>)>) -> Result<BuildResult> {
        let previous = self.previous.take();
        let mut outputs: HashMap<String, Result<FileOutput>> = outputs.into_iter().collect();

        let mut manifest = BuildManifest::new();
        let mut css = previous.as_ref().map(|m| m.css.clone()).unwrap_or_default();
        let mut rebuilt_files = Vec::new();
        let mut failed_files = Vec::new();

        for (key, state) in &plan.files {
            if !plan.needs_rebuild(key) {
                if let Some(entry) = previous.as_ref().and_then(|m| m.files.get(key)) {
                    manifest.files.insert(key.clone(), entry.clone());
                }
                continue;
            }

            let output = outputs
                .remove(key)
                .unwrap_or_else(|| Err(JitError::Build {
                    path: key.clone(),
                    message: "no output produced".to_string(),
                }));
            match output {
                Ok(output) => {
                    let content_hash = match state.content_hash {
                        Some(hash) => hash,
                        None => ContentHash::from_bytes(&std::fs::read(&state.path)?),
                    };
                    css = merge_css(&css, &output.css);
                    manifest.files.insert(
                        key.clone(),
                        ManifestEntry {
                            path: key.clone(),
                            content_hash,
                            size: state.size,
                            mtime: state.mtime,
                            dependencies: output.dependencies,
                            classes: output.classes,
                        },
                    );
                    rebuilt_files.push(key.clone());
                }
                Err(e) => {
                    tracing::warn!("build failed for {}: {}", key, e);
                    failed_files.push((key.clone(), e.to_string()));
                }
            }
        }

        if self.options.tree_shake {
            css = tree_shake(&css, &manifest.live_classes(), &self.regex_cache);
        }

        manifest.cache_key = BuildManifest::compute_cache_key(plan.files.keys());
        manifest.css = css.clone();
        if self.options.persist {
            manifest.save(&self.options.manifest_path)?;
        }

        let incremental = plan.had_previous && plan.to_rebuild.len() < plan.files.len();
        self.previous = Some(manifest.clone());

        Ok(BuildResult {
            added: plan.added,
            modified: plan.modified,
            deleted: plan.deleted,
            unchanged: plan.unchanged,
            rebuilt_files,
            failed_files,
            incremental,
            css,
            manifest,
        })
    }

    /// Plan, run `build_fn` on every file to rebuild in parallel, and apply
    pub fn build<F>(&mut self, files: &[PathBuf], build_fn: F) -> Result<BuildResult>
    where
        F: Fn(&Path) -> Result<FileOutput> + Sync,
    {
        let plan = self.plan(files);
        let outputs: Vec<(String, Result<FileOutput>)> = plan
            .rebuild_paths()
            .par_iter()
            .map(|path| (path_key(path), build_fn(path)))
            .collect();
        self.apply(plan, outputs)
    }

    /// Like [`build`](Self::build) for an asynchronous build function
    pub async fn build_async<F, Fut>(&mut self, files: &[PathBuf], build_fn: F) -> Result<BuildResult>
    where
        F: Fn(PathBuf) -> Fut,
        Fut: Future<Output = Result<FileOutput>>,
    {
        let plan = self.plan(files);
        let paths = plan.rebuild_paths();
        let results = join_all(paths.iter().cloned().map(&build_fn)).await;
        let outputs = paths.iter().map(|p| path_key(p)).zip(results).collect();
        self.apply(plan, outputs)
    }
}

fn inspect_file(path: &Path, hash_content: bool, previous: Option<&ManifestEntry>) -> std::io::Result<FileState> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"));
    }
    let mtime = metadata
        .modified()
        .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
        .unwrap_or(0);

    // Without content hashing, an unchanged mtime and size is trusted and
    // the file is not read.
    let content_hash = if hash_content {
        Some(ContentHash::from_bytes(&std::fs::read(path)?))
    } else {
        match previous {
            Some(entry) if entry.mtime == mtime && entry.size == metadata.len() => Some(entry.content_hash),
            _ => None,
        }
    };

    Ok(FileState {
        path: path.to_path_buf(),
        content_hash,
        size: metadata.len(),
        mtime,
    })
}

/// Manifest key for a path: the path with `.` segments removed and `..`
/// segments resolved lexically
pub fn path_key(path: &Path) -> String {
    normalize_path(path).to_string_lossy().into_owned()
}

pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn options(dir: &TempDir) -> IncrementalOptions {
        IncrementalOptions {
            manifest_path: dir.path().join(".jit").join("manifest.json"),
            hash_content: true,
            tree_shake: true,
            persist: true,
        }
    }

    fn class_css(class: &str) -> String {
        format!(".{} {{\n  x: y;\n}}", class)
    }

    fn fake_build(path: &Path) -> Result<FileOutput> {
        let content = fs::read_to_string(path)?;
        let classes: Vec<String> = content.split_whitespace().map(str::to_string).collect();
        let css = classes.iter().map(|c| class_css(c)).collect::<Vec<_>>().join("\n\n");
        Ok(FileOutput {
            classes,
            css,
            dependencies: Vec::new(),
        })
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("./src/../src/a.js")), PathBuf::from("src/a.js"));
        assert_eq!(normalize_path(Path::new("../a.js")), PathBuf::from("../a.js"));
    }

    #[test]
    fn test_first_build_is_full() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.html");
        fs::write(&a, "flex").unwrap();

        let mut builder = IncrementalBuilder::new(options(&dir), Arc::new(RegexCache::default()));
        let result = builder.build(&[a.clone()], fake_build).unwrap();
        assert!(!result.incremental);
        assert_eq!(result.added, vec![path_key(&a)]);
        assert!(result.css.contains(".flex"));
        assert!(options(&dir).manifest_path.exists());
    }

    #[test]
    fn test_mtime_mode_skips_unchanged() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.html");
        fs::write(&a, "flex").unwrap();
        let mut opts = options(&dir);
        opts.hash_content = false;

        let mut builder = IncrementalBuilder::new(opts.clone(), Arc::new(RegexCache::default()));
        builder.build(&[a.clone()], fake_build).unwrap();

        let builder = IncrementalBuilder::new(opts, Arc::new(RegexCache::default()));
        let plan = builder.plan(&[a.clone()]);
        assert_eq!(plan.unchanged, vec![path_key(&a)]);
        assert!(plan.to_rebuild.is_empty());
    }

    #[test]
    fn test_failed_file_does_not_abort() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.html");
        let b = dir.path().join("b.html");
        fs::write(&a, "flex").unwrap();
        fs::write(&b, "block").unwrap();

        let mut builder = IncrementalBuilder::new(options(&dir), Arc::new(RegexCache::default()));
        let result = builder
            .build(&[a.clone(), b.clone()], |path| {
                if path.ends_with("b.html") {
                    Err(JitError::Build {
                        path: path.display().to_string(),
                        message: "boom".into(),
                    })
                } else {
                    fake_build(path)
                }
            })
            .unwrap();
        assert_eq!(result.rebuilt_files, vec![path_key(&a)]);
        assert_eq!(result.failed_files.len(), 1);
        assert!(!result.manifest.files.contains_key(&path_key(&b)));
    }
}
