use clap::Parser;
use std::path::PathBuf;
use tailwind_jit::{Cli, Commands};

#[test]
fn test_cli_parse_basic() {
    let args = vec!["tailwind-jit", "build", "-i", "src/**/*.html", "-o", "output.css"];

    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Build(args) => {
            assert_eq!(args.input, vec!["src/**/*.html"]);
            assert_eq!(args.output_css.to_str().unwrap(), "output.css");
            assert_eq!(args.manifest, None);
            assert_eq!(args.manifest_path(), PathBuf::from("output.css.manifest.json"));
            assert!(!args.minify);
            assert!(!args.full);
            assert!(!args.no_cache);
            assert!(!args.verbose);
            assert!(!args.dry_run);
            assert!(args.validate().is_ok());
        }
        Commands::Pipe(_) => panic!("Unexpected Pipe command"),
    }
}

#[test]
fn test_cli_parse_with_flags() {
    let args = vec![
        "tailwind-jit",
        "build",
        "-i",
        "**/*.tsx",
        "-i",
        "**/*.vue",
        "-o",
        "dist/styles.css",
        "-m",
        "dist/manifest.json",
        "--minify",
        "--full",
        "--no-cache",
        "--verbose",
        "--dry-run",
        "-j",
        "4",
    ];

    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Build(args) => {
            assert_eq!(args.input, vec!["**/*.tsx", "**/*.vue"]);
            assert_eq!(args.manifest_path(), PathBuf::from("dist/manifest.json"));
            assert!(args.minify);
            assert!(args.full);
            assert!(args.no_cache);
            assert!(args.verbose);
            assert!(args.dry_run);
            assert_eq!(args.jobs, Some(4));
        }
        Commands::Pipe(_) => panic!("Unexpected Pipe command"),
    }
}

#[test]
fn test_cli_parse_with_exclude() {
    let args = vec![
        "tailwind-jit",
        "build",
        "-i",
        "src/**/*.jsx",
        "-o",
        "output.css",
        "-e",
        "**/node_modules/**",
        "**/*.test.jsx",
    ];

    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Build(args) => {
            assert_eq!(args.exclude, vec!["**/node_modules/**", "**/*.test.jsx"]);
        }
        Commands::Pipe(_) => panic!("Unexpected Pipe command"),
    }
}

#[test]
fn test_cli_requires_output() {
    let result = Cli::try_parse_from(["tailwind-jit", "build", "-i", "*.html"]);
    assert!(result.is_err());
}

#[test]
fn test_cli_validation() {
    let cli = Cli::parse_from(["tailwind-jit", "build", "-o", "a.css", "-m", "a.css"]);
    let Commands::Build(args) = cli.command else {
        panic!("Unexpected Pipe command");
    };
    assert!(args.validate().is_err());

    let cli = Cli::parse_from(["tailwind-jit", "build", "-o", "a.css", "-j", "0"]);
    let Commands::Build(args) = cli.command else {
        panic!("Unexpected Pipe command");
    };
    assert!(args.validate().is_err());
}

#[test]
fn test_cli_parse_pipe() {
    let cli = Cli::parse_from(["tailwind-jit", "pipe", "--minify"]);

    match cli.command {
        Commands::Pipe(args) => assert!(args.minify),
        Commands::Build(_) => panic!("Unexpected Build command"),
    }
}
