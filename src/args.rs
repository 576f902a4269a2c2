use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Utility-class CSS compiler - compiles the classes used in your sources to CSS on demand
#[derive(Parser, Debug)]
#[command(name = "tailwind-jit")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Incrementally build a stylesheet from source files
    Build(BuildArgs),
    /// Read source text from stdin and write CSS to stdout
    Pipe(PipeArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    /// Input file patterns (glob patterns supported)
    #[arg(
        short = 'i',
        long = "input",
        value_name = "PATTERN",
        num_args = 1..,
        help = "Input file patterns to scan for utility classes (defaults to the config's content globs)"
    )]
    pub input: Vec<String>,

    /// Output CSS file path
    #[arg(
        short = 'o',
        long = "output-css",
        value_name = "PATH",
        required = true,
        help = "Path where the generated CSS file will be written"
    )]
    pub output_css: PathBuf,

    /// Build manifest path (JSON)
    #[arg(
        short = 'm',
        long = "manifest",
        value_name = "PATH",
        help = "Path of the build manifest used for incremental builds"
    )]
    pub manifest: Option<PathBuf>,

    /// Configuration file path (YAML or JSON)
    #[arg(
        short = 'c',
        long = "config",
        value_name = "PATH",
        env = "TAILWIND_JIT_CONFIG",
        help = "Path to configuration file (YAML or JSON format)"
    )]
    pub config: Option<PathBuf>,

    /// Enable CSS minification
    #[arg(
        long = "minify",
        default_value_t = false,
        help = "Enable minification of the output CSS"
    )]
    pub minify: bool,

    /// Ignore the previous manifest
    #[arg(
        long = "full",
        default_value_t = false,
        help = "Rebuild every file instead of only the changed ones"
    )]
    pub full: bool,

    /// Disable the compiled-class cache
    #[arg(
        long = "no-cache",
        default_value_t = false,
        help = "Compile every class without consulting the cache"
    )]
    pub no_cache: bool,

    /// Verbose output
    #[arg(
        short = 'v',
        long = "verbose",
        default_value_t = false,
        help = "Enable verbose output"
    )]
    pub verbose: bool,

    /// Number of parallel workers to use
    #[arg(
        short = 'j',
        long = "jobs",
        value_name = "NUM",
        help = "Number of parallel workers to use (defaults to number of CPU cores)"
    )]
    pub jobs: Option<usize>,

    /// Exclude patterns (glob patterns to exclude)
    #[arg(
        short = 'e',
        long = "exclude",
        value_name = "PATTERN",
        num_args = 0..,
        help = "Patterns to exclude from scanning"
    )]
    pub exclude: Vec<String>,

    /// Dry run (don't write output files)
    #[arg(
        long = "dry-run",
        default_value_t = false,
        help = "Perform the build but don't write output files"
    )]
    pub dry_run: bool,
}

/// Arguments for the pipe command
#[derive(Parser, Debug, Clone)]
pub struct PipeArgs {
    /// Enable CSS minification
    #[arg(
        long = "minify",
        default_value_t = false,
        help = "Enable minification of the output CSS"
    )]
    pub minify: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(
        short = 'c',
        long = "config",
        value_name = "PATH",
        env = "TAILWIND_JIT_CONFIG",
        help = "Path to configuration file (YAML or JSON format)"
    )]
    pub config: Option<PathBuf>,
}

impl BuildArgs {
    /// Validate that the arguments are consistent
    pub fn validate(&self) -> Result<(), String> {
        // Check that output paths are not the same
        if let Some(manifest) = &self.manifest {
            if &self.output_css == manifest {
                return Err("Output CSS and manifest paths must be different".to_string());
            }
        }

        // Validate number of jobs if specified
        if let Some(jobs) = self.jobs {
            if jobs == 0 {
                return Err("Number of jobs must be at least 1".to_string());
            }
        }

        if self.input.iter().any(|pattern| pattern.trim().is_empty()) {
            return Err("Input patterns must not be empty".to_string());
        }

        Ok(())
    }

    /// Manifest location: the explicit flag, else next to the CSS output
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest.clone().unwrap_or_else(|| {
            let mut name = self
                .output_css
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "styles.css".into());
            name.push(".manifest.json");
            self.output_css.with_file_name(name)
        })
    }
}
