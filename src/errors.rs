use std::time::Duration;
use thiserror::Error;

/// Main error type for the tailwind-jit crate
#[derive(Debug, Error)]
pub enum JitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pattern error: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Glob error: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("No files found matching the provided patterns")]
    NoFilesFound,

    #[error("Failed to build {path}: {message}")]
    Build { path: String, message: String },

    #[error("Failed to write output to {path}: {message}")]
    OutputError { path: String, message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Persistent cache error: {0}")]
    Store(String),

    #[error("Task {task_id} timed out after {timeout:?}")]
    Timeout { task_id: u64, timeout: Duration },

    #[error("Worker pool terminated")]
    Terminated,

    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Input error: {0}")]
    InputError(String),

    #[error("Security violation: {0}")]
    SecurityError(String),
}

impl JitError {
    /// True for failures that a fallback path (inline execution, memory-only
    /// cache) can absorb.
    pub fn is_resource_failure(&self) -> bool {
        matches!(
            self,
            JitError::Terminated | JitError::WorkerCrashed(_) | JitError::Store(_)
        )
    }
}

macro_rules! store_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for JitError {
                fn from(e: $ty) -> Self {
                    JitError::Store(e.to_string())
                }
            }
        )*
    };
}

store_error_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

pub type Result<T> = std::result::Result<T, JitError>;
