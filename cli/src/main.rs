//! Mirrorpack CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mirrorpack_cli::commands::{dispatch, exit_code, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(exit_code(e.as_ref()));
    }
}
