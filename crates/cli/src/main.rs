/// Entry point for the Grafter CLI, a mixin injector for obfuscated class files.
///
/// Parses command-line arguments, initializes logging from `RUST_LOG` and dispatches to
/// the `inject`, `decode` and `hooks` subcommands.
use clap::Parser;
use grafter_cli::commands::{Cmd, Command};
use tracing_subscriber::EnvFilter;

/// Command-line interface for Grafter.
///
/// Grafter rewrites a directory of obfuscated class files so that a stable, named API
/// described by mixins and a hook table can reach their fields and methods.
#[derive(Parser)]
#[command(name = "grafter")]
#[command(about = "Grafter: mixin injection for obfuscated class files")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    cli.command.execute().await
}
