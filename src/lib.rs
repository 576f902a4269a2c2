pub mod args;
pub mod compiler;
pub mod config;
pub mod errors;
pub mod extractor;
pub mod generator;
pub mod hash;
pub mod hybrid_cache;
pub mod incremental;
pub mod manifest;
pub mod matcher;
pub mod memory_cache;
pub mod parser;
pub mod pool;
pub mod regex_cache;
pub mod rule;
pub mod store;
pub mod stylesheet;
pub mod worker;

pub use args::{BuildArgs, Cli, Commands, PipeArgs};
pub use compiler::{compile_batch, ClassCss, CompilerContext};
pub use config::JitConfig;
pub use errors::{JitError, Result};
pub use extractor::{ExtractedString, Extractor};
pub use hybrid_cache::{CacheStats, HybridCache, HybridCacheOptions};
pub use incremental::{BuildResult, FileOutput, IncrementalBuilder, IncrementalOptions};
pub use manifest::{BuildManifest, ManifestEntry};
pub use matcher::{match_rules, Match};
pub use parser::{expand_variant_groups, parse, ClassNameParser, ParsedClass};
pub use pool::{PoolOptions, WorkerPool};
pub use regex_cache::RegexCache;
pub use rule::{starter_rules, Rule, RuleSpec, RuleTable};
pub use store::{MemoryStore, PersistentStore, RedbStore};

use incremental::normalize_path;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Security configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Maximum file size in bytes (default: 10MB)
    pub max_file_size: u64,
    /// Allow symbolic links
    pub allow_symlinks: bool,
    /// Working directory for path traversal checks
    pub working_directory: PathBuf,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024, // 10MB
            allow_symlinks: false,
            working_directory: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

/// Outcome of a `build` run
#[derive(Debug)]
pub struct BuildSummary {
    /// Final stylesheet, with header and optional minification
    pub css_content: String,
    pub total_files: usize,
    pub rebuilt_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub failed_files: Vec<(String, String)>,
    /// Distinct classes recorded in the manifest
    pub total_classes: usize,
    pub incremental: bool,
    pub cache_stats: Option<CacheStats>,
    pub duration: Duration,
}

/// Run an incremental build
pub async fn build(args: BuildArgs) -> Result<BuildSummary> {
    build_with_security(args, SecurityConfig::default()).await
}

/// Run an incremental build with explicit security settings
pub async fn build_with_security(args: BuildArgs, security: SecurityConfig) -> Result<BuildSummary> {
    let start_time = Instant::now();

    args.validate().map_err(JitError::InvalidInput)?;

    let mut config = match &args.config {
        Some(path) => JitConfig::from_file(path)?,
        None => JitConfig::default(),
    };
    if let Some(jobs) = args.jobs {
        config.workers.concurrency = jobs;
    }
    if args.no_cache {
        config.cache.enabled = false;
    }

    let manifest_path = match (&args.manifest, &config.build.manifest_path) {
        (None, Some(path)) => path.clone(),
        _ => args.manifest_path(),
    };

    // Security: Validate output paths are safe
    validate_output_path(&args.output_css, &security)?;
    validate_output_path(&manifest_path, &security)?;

    let patterns = if args.input.is_empty() { &config.content } else { &args.input };
    tracing::info!("input patterns: {:?}", patterns);
    tracing::info!("output CSS: {}", args.output_css.display());
    tracing::info!("manifest: {}", manifest_path.display());

    let files = collect_files_with_security(patterns, &args.exclude, &security)?;
    if files.is_empty() {
        return Err(JitError::NoFilesFound);
    }
    let total_size: u64 = files.iter().map(|f| f.1).sum();
    tracing::info!(
        "found {} files ({:.2} MB)",
        files.len(),
        total_size as f64 / (1024.0 * 1024.0)
    );

    let context = CompilerContext::from_config(&config)?;
    let extractor = Extractor::new(Arc::clone(context.regex_cache()));

    let mut builder = IncrementalBuilder::new(
        IncrementalOptions {
            manifest_path,
            hash_content: config.build.hash_content,
            tree_shake: config.build.tree_shake,
            persist: !args.dry_run,
        },
        Arc::clone(context.regex_cache()),
    );
    if args.full {
        builder.reset();
    }

    // Create multi-progress container for better progress reporting
    let multi_progress = if !args.verbose {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    };
    let progress_bar = (!args.verbose).then(|| {
        let pb = multi_progress.add(ProgressBar::new(files.len() as u64));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({msg})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        pb.set_message("Compiling...");
        pb
    });

    let file_paths: Vec<PathBuf> = files.into_iter().map(|(path, _)| path).collect();
    let result = {
        let context = &context;
        let extractor = &extractor;
        let progress_bar = progress_bar.as_ref();
        builder
            .build_async(&file_paths, move |path| async move {
                let output = compile_file(context, extractor, &path).await;
                if let Some(pb) = progress_bar {
                    pb.inc(1);
                    pb.set_message(format!(
                        "Compiled: {}",
                        path.file_name().unwrap_or_default().to_string_lossy()
                    ));
                }
                output
            })
            .await
    };
    context.shutdown();
    let result = result?;

    let total_classes = result.manifest.live_classes().len();
    let css_content = render_stylesheet(&result.css, total_classes, args.minify);

    if let Some(pb) = &progress_bar {
        pb.set_position(file_paths.len() as u64);
        pb.finish_with_message(format!("✓ Complete ({} rebuilt)", result.rebuilt_files.len()));
    }

    if !args.dry_run {
        write_output(&args.output_css, &css_content)?;
    }

    let summary = BuildSummary {
        css_content,
        total_files: result.manifest.files.len(),
        rebuilt_files: result.rebuilt_files,
        deleted_files: result.deleted,
        failed_files: result.failed_files,
        total_classes,
        incremental: result.incremental,
        cache_stats: context.cache().map(|cache| cache.stats()),
        duration: start_time.elapsed(),
    };

    tracing::info!(
        "build complete: {} files, {} rebuilt, {} classes, {:.2}s",
        summary.total_files,
        summary.rebuilt_files.len(),
        summary.total_classes,
        summary.duration.as_secs_f64()
    );
    if let Some(stats) = &summary.cache_stats {
        tracing::info!("cache: {} hits, {} misses ({:.1}%)", stats.hits, stats.misses, stats.hit_rate);
    }

    Ok(summary)
}

/// Extract classes and imports from one file and compile its CSS
pub async fn compile_file(context: &CompilerContext, extractor: &Extractor, path: &Path) -> Result<FileOutput> {
    let content = fs::read_to_string(path).map_err(|e| JitError::Build {
        path: path.display().to_string(),
        message: format!("Failed to read file: {}", e),
    })?;
    let classes = extractor.extract_classes(&content);
    let dependencies = extractor.extract_imports(&content, path);
    let css = context.compile_to_css(&classes).await?;
    Ok(FileOutput {
        classes,
        css,
        dependencies,
    })
}

/// Compile the classes found in arbitrary source text
pub async fn compile_content(context: &CompilerContext, extractor: &Extractor, content: &str) -> Result<String> {
    let classes = extractor.extract_classes(content);
    if classes.is_empty() {
        return Ok(String::new());
    }
    context.compile_to_css(&classes).await
}

fn render_stylesheet(css: &str, class_count: usize, minify: bool) -> String {
    let header = stylesheet::generate_css_header(class_count, minify);
    if minify {
        stylesheet::minify_css(&format!("{}\n{}", header, css))
    } else {
        format!("{}{}\n", header, css)
    }
}

/// Validate that a path is safe (no path traversal)
pub fn validate_output_path(path: &Path, security: &SecurityConfig) -> Result<()> {
    if path.is_absolute() {
        return Ok(());
    }
    let working_dir = normalize_path(&security.working_directory);
    let resolved = normalize_path(&security.working_directory.join(path));

    // Check if path is within working directory
    if !resolved.starts_with(&working_dir) {
        return Err(JitError::SecurityError(format!(
            "Output path '{}' appears to use path traversal",
            path.display()
        )));
    }

    Ok(())
}

/// Check if a file is safe to read
pub fn validate_input_file(path: &Path, security: &SecurityConfig) -> Result<()> {
    // Check for symlinks if not allowed
    if !security.allow_symlinks && path.is_symlink() {
        return Err(JitError::SecurityError(format!(
            "Symbolic link not allowed: {}",
            path.display()
        )));
    }

    // If it's a symlink and we allow them, validate the target
    if security.allow_symlinks && path.is_symlink() {
        let target = path.canonicalize().map_err(|e| {
            JitError::SecurityError(format!("Cannot resolve symlink '{}': {}", path.display(), e))
        })?;
        let working_dir = security
            .working_directory
            .canonicalize()
            .unwrap_or_else(|_| security.working_directory.clone());

        if !target.starts_with(&working_dir) {
            return Err(JitError::SecurityError(format!(
                "Symlink target '{}' is outside working directory",
                target.display()
            )));
        }
    }

    // Check file size
    let metadata = fs::metadata(path).map_err(|e| {
        JitError::SecurityError(format!("Cannot read file metadata for '{}': {}", path.display(), e))
    })?;

    if metadata.len() > security.max_file_size {
        return Err(JitError::SecurityError(format!(
            "File '{}' exceeds maximum size limit ({} MB > {} MB)",
            path.display(),
            metadata.len() / (1024 * 1024),
            security.max_file_size / (1024 * 1024)
        )));
    }

    Ok(())
}

/// Collect files matching the given patterns with security checks
pub fn collect_files_with_security(
    patterns: &[String],
    exclude_patterns: &[String],
    security: &SecurityConfig,
) -> Result<Vec<(PathBuf, u64)>> {
    let mut files = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut skipped_count = 0;

    for pattern in patterns {
        for entry in glob::glob(pattern)? {
            let path = entry?;

            if should_exclude(&path, exclude_patterns)? {
                continue;
            }

            if path.is_dir() {
                continue;
            }

            if let Err(e) = validate_input_file(&path, security) {
                tracing::warn!("skipping file: {}", e);
                skipped_count += 1;
                continue;
            }

            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

            if seen.insert(path.clone()) {
                files.push((path, size));
            }
        }
    }

    if skipped_count > 0 {
        tracing::warn!("skipped {} files due to security constraints", skipped_count);
    }

    Ok(files)
}

/// Check if a path should be excluded
pub fn should_exclude(path: &Path, exclude_patterns: &[String]) -> Result<bool> {
    for pattern in exclude_patterns {
        let pattern = glob::Pattern::new(pattern)?;
        if pattern.matches_path(path) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    write_atomic(path, content).map_err(|e| JitError::OutputError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Write file atomically by writing to temp file then renaming
pub(crate) fn write_atomic<P: AsRef<Path>>(path: P, content: &str) -> std::io::Result<()> {
    use std::io::Write;

    let path = path.as_ref();
    let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    // Write to temporary file
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?; // Ensure data is flushed to disk

    // Atomically rename temp file to final name
    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Handle pipe command - read source text from stdin, output CSS to stdout
pub async fn handle_pipe_command(args: PipeArgs) -> Result<()> {
    use tokio::io::{self, AsyncReadExt, AsyncWriteExt};

    let mut input = String::new();
    let mut stdin = io::stdin();
    stdin
        .read_to_string(&mut input)
        .await
        .map_err(|e| JitError::InputError(format!("Failed to read from stdin: {}", e)))?;

    // If input is empty, output empty CSS
    if input.trim().is_empty() {
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => JitConfig::from_file(path)?,
        None => JitConfig::default(),
    };
    let context = CompilerContext::from_config(&config)?;
    let extractor = Extractor::new(Arc::clone(context.regex_cache()));
    let css = compile_content(&context, &extractor, &input).await;
    context.shutdown();
    let css = css?;

    if css.is_empty() {
        return Ok(());
    }
    let css_content = if args.minify { stylesheet::minify_css(&css) } else { format!("{}\n", css) };

    let mut stdout = io::stdout();
    stdout
        .write_all(css_content.as_bytes())
        .await
        .map_err(|e| JitError::OutputError {
            path: "stdout".to_string(),
            message: e.to_string(),
        })?;

    // Ensure output is flushed
    stdout.flush().await.map_err(|e| JitError::OutputError {
        path: "stdout".to_string(),
        message: e.to_string(),
    })?;

    Ok(())
}
