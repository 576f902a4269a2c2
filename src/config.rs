use crate::errors::{JitError, Result};
use crate::hybrid_cache::HybridCacheOptions;
use crate::pool::{PoolOptions, DEFAULT_PARALLEL_THRESHOLD};
use crate::regex_cache::DEFAULT_MAX_DYNAMIC;
use crate::rule::RuleSpec;
use crate::worker::{DEFAULT_RECYCLE_AFTER, DEFAULT_TASK_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Compiler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    /// Content paths to scan
    pub content: Vec<String>,

    /// Rule table; empty means the built-in starter rules
    pub rules: Vec<RuleSpec>,

    pub cache: CacheConfig,

    pub workers: WorkerConfig,

    pub build: BuildConfig,

    pub regex: RegexConfig,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            content: ["html", "jsx", "tsx", "js", "vue", "svelte"]
                .iter()
                .map(|ext| format!("./src/**/*.{}", ext))
                .collect(),
            rules: Vec::new(),
            cache: CacheConfig::default(),
            workers: WorkerConfig::default(),
            build: BuildConfig::default(),
            regex: RegexConfig::default(),
        }
    }
}

/// Hybrid cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Entries kept in the memory tier
    pub capacity: usize,

    /// Entry lifetime in seconds; `null` keeps entries forever
    pub ttl_secs: Option<u64>,

    /// Schema version stamped on persisted entries
    pub version: u32,

    /// Location of the persistent store; memory-only when unset
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
            ttl_secs: Some(86_400),
            version: 1,
            path: None,
        }
    }
}

impl CacheConfig {
    pub fn options(&self) -> HybridCacheOptions {
        HybridCacheOptions {
            capacity: self.capacity,
            default_ttl: self.ttl_secs.map(Duration::from_secs),
            version: self.version,
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker threads; 0 compiles in the calling thread
    pub concurrency: usize,
    pub task_timeout_ms: u64,
    pub recycle_after: u64,
    pub parallel_threshold: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            task_timeout_ms: DEFAULT_TASK_TIMEOUT.as_millis() as u64,
            recycle_after: DEFAULT_RECYCLE_AFTER,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl WorkerConfig {
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            concurrency: self.concurrency,
            task_timeout: Duration::from_millis(self.task_timeout_ms),
            recycle_after: self.recycle_after,
            parallel_threshold: self.parallel_threshold,
        }
    }
}

/// Incremental build settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Compare content hashes; when false only size and mtime are compared
    pub hash_content: bool,

    /// Drop CSS for classes no longer used by any tracked file
    pub tree_shake: bool,

    /// Manifest location when the CLI does not give one
    pub manifest_path: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            hash_content: true,
            tree_shake: true,
            manifest_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegexConfig {
    /// Ceiling on dynamically compiled patterns
    pub max_dynamic: usize,
}

impl Default for RegexConfig {
    fn default() -> Self {
        Self {
            max_dynamic: DEFAULT_MAX_DYNAMIC,
        }
    }
}

impl JitConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| JitError::ConfigError {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        serde_yaml::from_str(&content).map_err(|e| JitError::ConfigError {
            message: format!("Failed to parse YAML config: {}", e),
        })
    }

    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| JitError::ConfigError {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        serde_json::from_str(&content).map_err(|e| JitError::ConfigError {
            message: format!("Failed to parse JSON config: {}", e),
        })
    }

    /// Load configuration from a file (auto-detect format)
    pub fn from_file(path: &Path) -> Result<Self> {
        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(JitError::ConfigError {
                message: format!(
                    "Unsupported config file format: {}. Use .yaml, .yml, or .json",
                    path.display()
                ),
            }),
        }
    }

    /// Merge with another configuration. Content paths are unioned; a
    /// non-empty rule list in `other` replaces ours, and its cache, worker,
    /// build and regex sections win.
    pub fn merge(mut self, other: Self) -> Self {
        for path in other.content {
            if !self.content.contains(&path) {
                self.content.push(path);
            }
        }

        if !other.rules.is_empty() {
            self.rules = other.rules;
        }

        self.cache = other.cache;
        self.workers = other.workers;
        self.build = other.build;
        self.regex = other.regex;

        self
    }
}
