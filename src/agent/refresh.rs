//! Background forecast refresh
//!
//! Periodically re-fetches every card on the dashboard and reports progress
//! over a tokio channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::ForecastAgent;

/// Messages sent from the background refresh to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshMessage {
    /// A refresh cycle started
    RefreshStarted,
    /// A card was re-fetched
    CardUpdated { location: String },
    /// A card could not be refreshed; its previous contents stay on screen
    RefreshError { location: String, message: String },
    /// A refresh cycle finished
    RefreshCompleted { refreshed: usize },
}

/// Configuration for the refresh loop
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub interval: Duration,
    /// Whether auto-refresh is enabled
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            enabled: true,
        }
    }
}

/// Handle for controlling the background refresh
pub struct RefreshHandle {
    pub receiver: mpsc::Receiver<RefreshMessage>,
    shutdown_tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Spawns the refresh loop for `agent`
    ///
    /// The first cycle runs one interval after spawning.
    pub fn spawn(agent: Arc<ForecastAgent>, config: RefreshConfig) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        if config.enabled {
            let tx = msg_tx;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.interval);
                // Skip the immediate first tick
                interval.tick().await;

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if tx.send(RefreshMessage::RefreshStarted).await.is_err() {
                                break;
                            }
                            let summary = agent.refresh_all().await;
                            tracing::info!(
                                refreshed = summary.refreshed.len(),
                                failed = summary.failed.len(),
                                "refresh cycle finished"
                            );
                            if summary.served_from_snapshots() {
                                tracing::info!(
                                    "every card was answered from the cached generation; \
                                     forecasts change once a new generation is activated"
                                );
                            }
                            let refreshed = summary.refreshed.len();
                            for location in summary.refreshed {
                                let _ = tx.send(RefreshMessage::CardUpdated { location }).await;
                            }
                            for (location, message) in summary.failed {
                                let _ = tx.send(RefreshMessage::RefreshError { location, message }).await;
                            }
                            let _ = tx.send(RefreshMessage::RefreshCompleted { refreshed }).await;
                        }
                        _ = shutdown_rx.recv() => {
                            tracing::debug!("refresh loop stopped");
                            break;
                        }
                    }
                }
            });
        }

        Self {
            receiver: msg_rx,
            shutdown_tx,
        }
    }

    /// Stops the background refresh
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}
