use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tailwind_jit::incremental::path_key;
use tailwind_jit::{
    compile_file, CompilerContext, Extractor, FileOutput, IncrementalBuilder, IncrementalOptions, JitConfig,
    JitError, RegexCache, Result,
};
use tempfile::TempDir;

fn options(dir: &TempDir) -> IncrementalOptions {
    IncrementalOptions {
        manifest_path: dir.path().join("out").join("manifest.json"),
        hash_content: true,
        tree_shake: true,
        persist: true,
    }
}

fn builder(dir: &TempDir) -> IncrementalBuilder {
    IncrementalBuilder::new(options(dir), Arc::new(RegexCache::default()))
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Each whitespace token is a class, `@dep name` records a dependency
fn token_build(path: &Path) -> Result<FileOutput> {
    let content = fs::read_to_string(path)?;
    let mut output = FileOutput::default();
    let mut tokens = content.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "@dep" {
            if let Some(dep) = tokens.next() {
                output.dependencies.push(path_key(&path.with_file_name(dep)));
            }
        } else if token == "@fail" {
            return Err(JitError::Build {
                path: path.display().to_string(),
                message: "requested failure".to_string(),
            });
        } else {
            output.css = format!("{}\n\n.{} {{\n  x: y;\n}}", output.css, token);
            output.classes.push(token.to_string());
        }
    }
    output.css = output.css.trim().to_string();
    Ok(output)
}

#[test]
fn test_changed_file_rebuilds_itself_and_dependents() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.txt", "alpha");
    let b = write(&dir, "b.txt", "beta @dep a.txt");
    let c = write(&dir, "c.txt", "gamma");
    let files = vec![a.clone(), b.clone(), c.clone()];

    let first = builder(&dir).build(&files, token_build).unwrap();
    assert!(!first.incremental);
    assert_eq!(first.rebuilt_files.len(), 3);

    write(&dir, "a.txt", "alpha2");
    let mut second_builder = builder(&dir);
    let plan = second_builder.plan(&files);
    assert_eq!(plan.modified, vec![path_key(&a)]);
    assert_eq!(plan.dependents, vec![path_key(&b)]);
    assert_eq!(plan.unchanged, vec![path_key(&c)]);

    let second = second_builder.build(&files, token_build).unwrap();
    assert!(second.incremental);
    assert_eq!(second.rebuilt_files, vec![path_key(&a), path_key(&b)]);
    assert!(second.css.contains(".alpha2"));
    assert!(second.css.contains(".gamma"));
    assert!(!second.css.contains(".alpha {"));
}

#[test]
fn test_deleted_file_is_dropped() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.txt", "alpha");
    let b = write(&dir, "b.txt", "beta");

    builder(&dir).build(&[a.clone(), b.clone()], token_build).unwrap();

    fs::remove_file(&b).unwrap();
    let result = builder(&dir).build(&[a.clone(), b.clone()], token_build).unwrap();

    assert_eq!(result.deleted, vec![path_key(&b)]);
    assert!(result.rebuilt_files.is_empty());
    assert!(!result.manifest.files.contains_key(&path_key(&b)));
    assert!(!result.css.contains(".beta"));
    assert!(result.css.contains(".alpha"));
}

#[test]
fn test_unchanged_inputs_rebuild_nothing() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.txt", "alpha");

    builder(&dir).build(&[a.clone()], token_build).unwrap();
    let result = builder(&dir).build(&[a.clone()], token_build).unwrap();

    assert!(result.incremental);
    assert!(result.rebuilt_files.is_empty());
    assert_eq!(result.unchanged, vec![path_key(&a)]);
    assert!(result.css.contains(".alpha"));
}

#[test]
fn test_failed_file_does_not_abort_batch() {
    let dir = TempDir::new().unwrap();
    let good = write(&dir, "good.txt", "ok");
    let bad = write(&dir, "bad.txt", "@fail");

    let result = builder(&dir).build(&[good.clone(), bad.clone()], token_build).unwrap();

    assert_eq!(result.rebuilt_files, vec![path_key(&good)]);
    assert_eq!(result.failed_files.len(), 1);
    assert_eq!(result.failed_files[0].0, path_key(&bad));
    assert!(!result.manifest.files.contains_key(&path_key(&bad)));

    // The failed file is retried on the next build
    write(&dir, "bad.txt", "fixed");
    let retry = builder(&dir).build(&[good, bad.clone()], token_build).unwrap();
    assert_eq!(retry.added, vec![path_key(&bad)]);
    assert!(retry.css.contains(".fixed"));
}

#[test]
fn test_mtime_mode_detects_size_change() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.txt", "alpha");
    let mut opts = options(&dir);
    opts.hash_content = false;

    IncrementalBuilder::new(opts.clone(), Arc::new(RegexCache::default()))
        .build(&[a.clone()], token_build)
        .unwrap();

    write(&dir, "a.txt", "alpha beta");
    let result = IncrementalBuilder::new(opts, Arc::new(RegexCache::default()))
        .build(&[a.clone()], token_build)
        .unwrap();
    assert_eq!(result.modified, vec![path_key(&a)]);
    assert!(result.css.contains(".beta"));
}

#[tokio::test]
async fn test_async_build_records_imports() {
    let dir = TempDir::new().unwrap();
    write(&dir, "button.js", r#"export const cls = "p-4 rounded";"#);
    let app = write(
        &dir,
        "app.js",
        r#"import { cls } from "./button";
const root = `flex ${cls}`;"#,
    );
    let button = dir.path().join("button.js");

    let mut config = JitConfig::default();
    config.cache.enabled = false;
    config.workers.concurrency = 0;
    let context = CompilerContext::from_config(&config).unwrap();
    let extractor = Extractor::new(Arc::clone(context.regex_cache()));

    let mut first_builder = IncrementalBuilder::new(options(&dir), Arc::clone(context.regex_cache()));
    let files = vec![app.clone(), button.clone()];
    let result = first_builder
        .build_async(&files, |path| {
            let context = &context;
            let extractor = &extractor;
            async move { compile_file(context, extractor, &path).await }
        })
        .await
        .unwrap();

    let entry = &result.manifest.files[&path_key(&app)];
    assert_eq!(entry.dependencies, vec![path_key(&button)]);
    assert!(result.css.contains(".flex {"));
    assert!(result.css.contains(".rounded {"));

    // Touching the imported file rebuilds the importer too
    write(&dir, "button.js", r#"export const cls = "p-2 rounded";"#);
    let plan = IncrementalBuilder::new(options(&dir), Arc::clone(context.regex_cache())).plan(&files);
    assert_eq!(plan.modified, vec![path_key(&button)]);
    assert_eq!(plan.dependents, vec![path_key(&app)]);
}

#[test]
fn test_corrupt_manifest_means_full_build() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.txt", "alpha");
    fs::create_dir_all(dir.path().join("out")).unwrap();
    fs::write(dir.path().join("out").join("manifest.json"), "{ not json").unwrap();

    let result = builder(&dir).build(&[a], token_build).unwrap();
    assert!(!result.incremental);
    assert_eq!(result.rebuilt_files.len(), 1);
}
