//! upswitch CLI entry point.
//!
//! Successful runs are silent apart from the supervised daemon's own
//! output. Errors are printed with their full cause chain and exit with a
//! non-zero status; there is no automatic retry of a failed upgrade.

use clap::Parser;
use tracing_subscriber::EnvFilter;
use upswitch::cli::Cli;

#[tokio::main]
async fn main() {
    // Supervisor diagnostics go to stderr and default to warnings only; the
    // child's output is the primary interface.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = cli.execute().await {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
