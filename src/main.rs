//! Marvel Cache CLI - Inspect and manage the local Marvel catalog cache
//!
//! Reads characters and comics through the cache, falling back to the Marvel
//! API when keys are configured, and manages favorites and search history.

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use marvelcache::app::App;
use marvelcache::cli::Cli;
use marvelcache::config::AppConfig;
use marvelcache::error::AppError;

/// Installs a stderr subscriber honoring `RUST_LOG`
fn init_tracing(verbose: bool) {
    let default = if verbose { "marvelcache=debug" } else { "marvelcache=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Ignore the error if a subscriber is already installed
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> Result<String, AppError> {
    let config = AppConfig::from_cli(&cli)?;
    let app = App::open(&config).await?;
    app.run(&cli.command).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
