use clap::Parser;
use tailwind_jit::{build, handle_pipe_command, Cli, Commands};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    match cli.command {
        Commands::Build(args) => {
            init_tracing(args.verbose);
            match build(args).await {
                Ok(summary) => {
                    println!("Build successful!");
                    println!(
                        "  - {} files tracked, {} rebuilt{}",
                        summary.total_files,
                        summary.rebuilt_files.len(),
                        if summary.incremental { " (incremental)" } else { "" }
                    );
                    println!("  - {} unique classes", summary.total_classes);
                    if !summary.failed_files.is_empty() {
                        println!("  - {} files failed:", summary.failed_files.len());
                        for (path, message) in &summary.failed_files {
                            println!("      {}: {}", path, message);
                        }
                    }
                    Ok(())
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Pipe(args) => {
            init_tracing(false);
            handle_pipe_command(args).await?;
            Ok(())
        }
    }
}
