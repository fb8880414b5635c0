//! Application wiring for the meridian binary
//!
//! Builds the snapshot store, network and registration from [`AppConfig`]
//! and runs one CLI command against them. Page commands (`fetch`,
//! `forecast`, `add`, `refresh`, `watch`) behave like a dashboard page
//! load: the configured manifest is registered first, and a failed
//! registration is logged without stopping the page.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::agent::{
    AddOutcome, AgentError, ForecastAgent, ForecastCard, PreferenceError, PreferenceStore,
    RefreshConfig, RefreshHandle, RefreshMessage,
};
use crate::cli::{resolve_fetch_url, CliError, Command};
use crate::config::{AppConfig, ConfigError};
use crate::intermediary::{LifecycleError, Registration, ResponseSource, UpdateOutcome};
use crate::network::{HttpNetwork, Network, NetworkError, Request};
use crate::store::{DiskSnapshotStore, SnapshotStore, StoreError};

/// Errors surfaced by a CLI command
#[derive(Debug, Error)]
pub enum AppError {
    #[error("could not determine the {0} directory; set it in the configuration")]
    NoDirectory(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cli(#[from] CliError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Preferences(#[from] PreferenceError),

    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),

    #[error("failed to render output: {0}")]
    Json(#[from] serde_json::Error),
}

/// The intermediary and its collaborators for one process
pub struct App {
    config: AppConfig,
    origin: Url,
    store: Arc<dyn SnapshotStore>,
    registration: Arc<Registration>,
    prefs_path: PathBuf,
}

impl App {
    /// Opens the on-disk store and restores the registration it describes
    pub async fn open(config: AppConfig) -> Result<Self, AppError> {
        let store = match &config.store_dir {
            Some(dir) => DiskSnapshotStore::with_dir(dir.clone()),
            None => DiskSnapshotStore::new().ok_or(AppError::NoDirectory("cache"))?,
        };
        store.sweep_leftovers().await?;
        tracing::debug!(root = %store.root().display(), "snapshot store opened");

        let prefs_path = match &config.prefs_path {
            Some(path) => path.clone(),
            None => PreferenceStore::new()
                .ok_or(AppError::NoDirectory("data"))?
                .path()
                .to_path_buf(),
        };

        let network = HttpNetwork::new(&config.user_agent, config.timeout())?;
        Self::with_parts(config, Arc::new(store), Arc::new(network), prefs_path).await
    }

    /// Builds an app from explicit parts
    pub async fn with_parts(
        config: AppConfig,
        store: Arc<dyn SnapshotStore>,
        network: Arc<dyn Network>,
        prefs_path: PathBuf,
    ) -> Result<Self, AppError> {
        let origin = config.origin_url()?;
        let registration = Registration::restore(origin.clone(), store.clone(), network).await?;
        Ok(Self {
            config,
            origin,
            store,
            registration: Arc::new(registration),
            prefs_path,
        })
    }

    pub fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    /// Installs and activates the configured manifest
    pub async fn install(&self, force: bool) -> Result<UpdateOutcome, AppError> {
        Ok(self
            .registration
            .update(self.config.manifest.clone(), force)
            .await?)
    }

    /// Page-load registration; failures leave the page working uncontrolled
    async fn register(&self) {
        match self.registration.update(self.config.manifest.clone(), false).await {
            Ok(UpdateOutcome::UpToDate { version }) => {
                tracing::debug!(%version, "intermediary up to date")
            }
            Ok(UpdateOutcome::Activated { installed, .. }) => {
                tracing::info!(version = %installed.name, entries = installed.entries, "intermediary registered")
            }
            Err(e) => tracing::warn!(error = %e, "intermediary registration failed"),
        }
    }

    /// Loads the page and returns its forecast agent
    async fn open_page(&self) -> ForecastAgent {
        self.register().await;
        if self.config.require_air_quality_key().is_err() {
            tracing::debug!("no air-quality key configured");
        }
        ForecastAgent::open(
            self.registration.clone(),
            self.origin.clone(),
            PreferenceStore::with_path(self.prefs_path.clone()),
            self.config.agent_settings(),
        )
        .await
    }

    /// Runs one command, writing its output to `out`
    pub async fn run<W: Write>(
        &self,
        command: &Command,
        watch_interval: Option<Duration>,
        out: &mut W,
    ) -> Result<(), AppError> {
        match command {
            Command::Install { force } => {
                let outcome = self.install(*force).await?;
                print_update(out, &outcome)?;
            }
            Command::Generations => {
                let current = self.store.current().await?;
                for generation in self.store.generations().await? {
                    let marker = if current.as_deref() == Some(generation.name.as_str()) {
                        '*'
                    } else {
                        ' '
                    };
                    writeln!(
                        out,
                        "{} {} ({} entries, created {})",
                        marker,
                        generation.name,
                        generation.entries,
                        generation.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                    )?;
                }
            }
            Command::Fetch { url } => {
                let url = resolve_fetch_url(&self.origin, url)?;
                let agent = self.open_page().await;
                let request = Request::get(url);
                let intercepted = self.registration.handle_fetch(agent.client(), &request).await?;
                let source = match &intercepted.source {
                    ResponseSource::Snapshot { generation } => format!("snapshot {generation}"),
                    ResponseSource::Network => "network".to_string(),
                };
                eprintln!(
                    "{} {} ({}, {})",
                    intercepted.response.status,
                    request.url,
                    source,
                    intercepted.response.header("content-type").unwrap_or("no content type")
                );
                out.write_all(&intercepted.response.body)?;
            }
            Command::Forecast { location } => {
                let agent = self.open_page().await;
                agent.load_preferences().await?;
                let outcome = agent.get_forecast(location).await?;
                tracing::debug!(?outcome, "forecast");
                if let Some(card) = agent.card(location).await {
                    print_card(out, &card)?;
                }
            }
            Command::Add { location } => {
                let agent = self.open_page().await;
                agent.load_preferences().await?;
                match agent.add_location(location).await? {
                    AddOutcome::Added(outcome) => {
                        if let Some(card) = agent.card(&outcome.location).await {
                            print_card(out, &card)?;
                        }
                    }
                    AddOutcome::Deferred(location) => {
                        writeln!(out, "{location} saved; it will be fetched once online")?;
                    }
                }
            }
            Command::Locations => {
                let preferences = PreferenceStore::with_path(self.prefs_path.clone());
                for location in preferences.preferred_locations().await? {
                    writeln!(out, "{location}")?;
                }
            }
            Command::Refresh => {
                let agent = self.open_page().await;
                let restored = agent.startup().await?;
                for card in agent.cards().await {
                    print_card(out, &card)?;
                }
                tracing::info!(restored, shown = agent.cards().await.len(), "refresh finished");
            }
            Command::Watch { .. } => {
                let interval = watch_interval.unwrap_or_else(|| self.config.refresh_interval());
                self.watch(interval, out).await?;
            }
        }
        Ok(())
    }

    async fn watch<W: Write>(&self, interval: Duration, out: &mut W) -> Result<(), AppError> {
        let agent = Arc::new(self.open_page().await);
        agent.startup().await?;
        for card in agent.cards().await {
            print_card(out, &card)?;
        }

        tracing::info!(interval_secs = interval.as_secs(), "watching; press Ctrl-C to stop");
        let mut handle = RefreshHandle::spawn(
            agent.clone(),
            RefreshConfig {
                interval,
                enabled: true,
            },
        );

        loop {
            tokio::select! {
                message = handle.receiver.recv() => {
                    let Some(message) = message else { break };
                    match message {
                        RefreshMessage::RefreshStarted => tracing::debug!("refreshing"),
                        RefreshMessage::CardUpdated { location } => {
                            if let Some(card) = agent.card(&location).await {
                                print_card(out, &card)?;
                            }
                        }
                        RefreshMessage::RefreshError { location, message } => {
                            tracing::warn!(%location, %message, "refresh failed")
                        }
                        RefreshMessage::RefreshCompleted { refreshed } => {
                            tracing::info!(refreshed, "refresh completed")
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("stopping");
                    break;
                }
            }
        }

        handle.shutdown().await;
        Ok(())
    }
}

fn print_update<W: Write>(out: &mut W, outcome: &UpdateOutcome) -> io::Result<()> {
    match outcome {
        UpdateOutcome::UpToDate { version } => writeln!(out, "{version} is already active"),
        UpdateOutcome::Activated {
            installed,
            activation,
            ..
        } => {
            writeln!(out, "{} active ({} entries)", installed.name, installed.entries)?;
            for removed in &activation.removed {
                writeln!(out, "removed {removed}")?;
            }
            for failed in &activation.failed {
                writeln!(out, "could not remove {failed}")?;
            }
            Ok(())
        }
    }
}

fn print_card<W: Write>(out: &mut W, card: &ForecastCard) -> Result<(), AppError> {
    writeln!(out, "{}", serde_json::to_string_pretty(card)?)?;
    Ok(())
}
