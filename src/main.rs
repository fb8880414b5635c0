//! Weather By Meridian - offline-first forecast dashboard
//!
//! Installs the dashboard's app shell into a versioned snapshot store, serves
//! page requests cache-first through the intermediary, and fetches forecasts
//! for saved locations.

use std::io;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use meridian::app::App;
use meridian::cli::Cli;
use meridian::config::AppConfig;

/// Environment variable holding the log filter
const LOG_ENV: &str = "MERIDIAN_LOG";

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    cli.validate()?;
    let config = AppConfig::load_from(cli.config.as_deref())?;
    let app = App::open(config).await?;

    let mut stdout = io::stdout().lock();
    app.run(&cli.command, cli.watch_interval()?, &mut stdout).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| e as Box<dyn std::error::Error>)?;

    let cli = Cli::parse();

    // Command failures are reported by message rather than by Debug
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    Ok(())
}
