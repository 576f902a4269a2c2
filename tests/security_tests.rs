use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use tailwind_jit::{
    build_with_security, collect_files_with_security, should_exclude, validate_output_path, BuildArgs, JitError,
    SecurityConfig,
};
use tempfile::TempDir;

fn security(dir: &TempDir) -> SecurityConfig {
    SecurityConfig {
        working_directory: dir.path().to_path_buf(),
        ..SecurityConfig::default()
    }
}

fn pattern(dir: &TempDir, glob: &str) -> Vec<String> {
    vec![format!("{}/{}", dir.path().display(), glob)]
}

#[tokio::test]
async fn test_file_size_limit() {
    let temp_dir = TempDir::new().unwrap();

    let large_file = temp_dir.path().join("large_file.html");
    fs::write(&large_file, format!(r#"<div class="p-4">{}</div>"#, "a".repeat(4096))).unwrap();

    let normal_file = temp_dir.path().join("normal_file.html");
    fs::write(&normal_file, r#"<div class="flex">Test</div>"#).unwrap();

    let security = SecurityConfig {
        max_file_size: 1024,
        ..security(&temp_dir)
    };

    let args = BuildArgs {
        input: pattern(&temp_dir, "*.html"),
        output_css: temp_dir.path().join("output.css"),
        manifest: None,
        config: None,
        minify: false,
        full: false,
        no_cache: true,
        verbose: true,
        jobs: Some(1),
        exclude: vec![],
        dry_run: true,
    };

    // The oversized file is skipped, not fatal
    let summary = build_with_security(args, security).await.unwrap();
    assert_eq!(summary.total_files, 1);
    assert!(summary.css_content.contains(".flex"));
    assert!(!summary.css_content.contains(".p-4"));
}

#[test]
fn test_symlinks_rejected_by_default() {
    let temp_dir = TempDir::new().unwrap();

    let real_file = temp_dir.path().join("real_file.html");
    fs::write(&real_file, r#"<div class="flex"></div>"#).unwrap();
    symlink(&real_file, temp_dir.path().join("link_file.html")).unwrap();

    let files = collect_files_with_security(&pattern(&temp_dir, "*.html"), &[], &security(&temp_dir)).unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].0.ends_with("real_file.html"));
}

#[test]
fn test_allowed_symlinks_must_stay_inside_working_directory() {
    let temp_dir = TempDir::new().unwrap();
    let outside_dir = TempDir::new().unwrap();

    let real_file = temp_dir.path().join("real_file.html");
    fs::write(&real_file, r#"<div class="flex"></div>"#).unwrap();
    symlink(&real_file, temp_dir.path().join("inside_link.html")).unwrap();

    let outside_file = outside_dir.path().join("outside.html");
    fs::write(&outside_file, r#"<div class="bg-red-500"></div>"#).unwrap();
    symlink(&outside_file, temp_dir.path().join("outside_link.html")).unwrap();

    let security = SecurityConfig {
        allow_symlinks: true,
        ..security(&temp_dir)
    };
    let files = collect_files_with_security(&pattern(&temp_dir, "*.html"), &[], &security).unwrap();

    let names: Vec<_> = files
        .iter()
        .filter_map(|(path, _)| path.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"real_file.html".to_string()));
    assert!(names.contains(&"inside_link.html".to_string()));
}

#[test]
fn test_path_traversal_prevention() {
    let temp_dir = TempDir::new().unwrap();
    let security = security(&temp_dir);

    assert!(validate_output_path(Path::new("dist/app.css"), &security).is_ok());
    assert!(validate_output_path(Path::new("dist/../app.css"), &security).is_ok());

    let err = validate_output_path(Path::new("../../etc/passwd"), &security).unwrap_err();
    assert!(matches!(err, JitError::SecurityError(_)));
    assert!(validate_output_path(Path::new("dist/../../app.css"), &security).is_err());
}

#[tokio::test]
async fn test_traversal_output_fails_build() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("a.html"), r#"<div class="flex"></div>"#).unwrap();

    let args = BuildArgs {
        input: pattern(&temp_dir, "*.html"),
        output_css: "../../outside.css".into(),
        manifest: None,
        config: None,
        minify: false,
        full: false,
        no_cache: true,
        verbose: true,
        jobs: Some(1),
        exclude: vec![],
        dry_run: true,
    };

    let err = build_with_security(args, security(&temp_dir)).await.unwrap_err();
    assert!(matches!(err, JitError::SecurityError(_)));
}

#[test]
fn test_exclude_patterns() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("node_modules")).unwrap();
    fs::write(temp_dir.path().join("app.html"), "<div></div>").unwrap();
    fs::write(temp_dir.path().join("app.test.html"), "<div></div>").unwrap();
    fs::write(temp_dir.path().join("node_modules").join("dep.html"), "<div></div>").unwrap();

    let exclude = vec!["**/node_modules/**".to_string(), "**/*.test.html".to_string()];
    assert!(should_exclude(&temp_dir.path().join("node_modules/dep.html"), &exclude).unwrap());
    assert!(!should_exclude(&temp_dir.path().join("app.html"), &exclude).unwrap());

    let files = collect_files_with_security(&pattern(&temp_dir, "**/*.html"), &exclude, &security(&temp_dir)).unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].0.ends_with("app.html"));
}

#[test]
fn test_invalid_exclude_pattern_is_an_error() {
    let result = should_exclude(Path::new("a.html"), &["[".to_string()]);
    assert!(result.is_err());
}
