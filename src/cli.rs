//! Command-line interface parsing for meridian
//!
//! Each subcommand maps onto one intermediary or agent operation; see
//! [`crate::app::App::run`].

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;
use url::Url;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// Interval is not a whole number of seconds greater than zero
    #[error("Invalid interval: '{0}'. Expected a number of seconds greater than 0")]
    InvalidInterval(String),

    /// URL is neither absolute nor resolvable against the origin
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Weather By Meridian - offline-first forecast dashboard
#[derive(Parser, Debug)]
#[command(name = "meridian")]
#[command(about = "Offline-first weather dashboard: snapshot store, request intermediary and forecast agent")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file (overrides MERIDIAN_CONFIG_FILE)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Install and activate the configured app shell
    Install {
        /// Reinstall even if the active generation already serves this manifest
        #[arg(long)]
        force: bool,
    },
    /// List snapshot generations, marking the current one
    Generations,
    /// Request a URL as a controlled page (body to stdout)
    ///
    /// Relative URLs resolve against the configured origin.
    Fetch { url: String },
    /// Show the cached, then live, forecast for one location
    Forecast { location: String },
    /// Add a location to the dashboard
    Add { location: String },
    /// Print the saved locations
    Locations,
    /// Reload saved locations and refresh every card
    Refresh,
    /// Refresh periodically until interrupted
    ///
    /// Example:
    ///   meridian watch --interval 300
    Watch {
        /// Seconds between refreshes (defaults to refresh_interval_secs)
        #[arg(long, value_name = "SECS")]
        interval: Option<String>,
    },
}

/// Parses a refresh interval given in whole seconds
pub fn parse_interval_arg(s: &str) -> Result<Duration, CliError> {
    match s.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(CliError::InvalidInterval(s.to_string())),
    }
}

/// Resolves a `fetch` argument against the dashboard origin
pub fn resolve_fetch_url(origin: &Url, url: &str) -> Result<Url, CliError> {
    origin.join(url).map_err(|source| CliError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

impl Cli {
    /// Checks arguments that clap cannot, before any configuration is loaded
    pub fn validate(&self) -> Result<(), CliError> {
        self.watch_interval().map(|_| ())
    }

    /// Interval given to `watch`, if any
    pub fn watch_interval(&self) -> Result<Option<Duration>, CliError> {
        match &self.command {
            Command::Watch {
                interval: Some(interval),
            } => parse_interval_arg(interval).map(Some),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval_arg() {
        assert_eq!(parse_interval_arg("300").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_interval_arg(" 5 ").unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_interval_arg_invalid() {
        for bad in ["0", "-1", "soon", "1.5", ""] {
            let err = parse_interval_arg(bad).unwrap_err();
            assert!(err.to_string().contains("Invalid interval"), "{bad}");
        }
    }

    #[test]
    fn test_resolve_fetch_url() {
        let origin = Url::parse("http://localhost:8080/").unwrap();
        assert_eq!(
            resolve_fetch_url(&origin, "/styles/style.css").unwrap().as_str(),
            "http://localhost:8080/styles/style.css"
        );
        assert_eq!(
            resolve_fetch_url(&origin, "https://api.example.com/x").unwrap().as_str(),
            "https://api.example.com/x"
        );
        assert!(resolve_fetch_url(&origin, "http://[bad").is_err());
    }

    #[test]
    fn test_cli_parse_install() {
        let cli = Cli::parse_from(["meridian", "install"]);
        assert_eq!(cli.command, Command::Install { force: false });

        let cli = Cli::parse_from(["meridian", "install", "--force"]);
        assert_eq!(cli.command, Command::Install { force: true });
    }

    #[test]
    fn test_cli_parse_global_config() {
        let cli = Cli::parse_from(["meridian", "locations", "--config", "m.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("m.toml")));
        assert_eq!(cli.command, Command::Locations);
    }

    #[test]
    fn test_cli_parse_forecast_location() {
        let cli = Cli::parse_from(["meridian", "forecast", "New York"]);
        assert_eq!(
            cli.command,
            Command::Forecast {
                location: "New York".to_string()
            }
        );
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["meridian"]).is_err());
    }

    #[test]
    fn test_watch_interval() {
        let cli = Cli::parse_from(["meridian", "watch"]);
        assert_eq!(cli.watch_interval().unwrap(), None);

        let cli = Cli::parse_from(["meridian", "watch", "--interval", "60"]);
        assert_eq!(cli.watch_interval().unwrap(), Some(Duration::from_secs(60)));

        let cli = Cli::parse_from(["meridian", "watch", "--interval", "0"]);
        assert!(cli.validate().is_err());
    }
}
