//! Install and activate transitions
//!
//! Both transitions run as [`LifecycleTask`]s. The caller that dispatched the
//! lifecycle event must await the task until it settles; dropping it early
//! leaves the install or deletion sweep to finish unobserved.

use std::future::Future;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use thiserror::Error;
use tokio::task::JoinHandle;
use url::Url;

use super::AssetManifest;
use crate::network::{Network, NetworkError, Request};
use crate::store::{Generation, GenerationInfo, Snapshot, SnapshotStore, StoreError};

/// Identifier of an intermediary instance
pub type WorkerId = u64;

/// Lifecycle stage of one intermediary instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Populating its generation from the manifest
    Installing,
    /// Installed, not yet controlling pages
    Waiting,
    /// Serving requests for controlled pages
    Active,
    /// Superseded or failed; terminal
    Redundant,
}

/// One intermediary instance, tied to a single manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    pub id: WorkerId,
    /// Label of the generation this instance serves from
    pub version: String,
    pub fingerprint: String,
    pub state: LifecycleState,
}

impl Worker {
    pub fn new(id: WorkerId, version: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            id,
            version: version.into(),
            fingerprint: fingerprint.into(),
            state: LifecycleState::Installing,
        }
    }
}

/// Errors that fail a lifecycle transition
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A manifest locator could not be resolved to a URL
    #[error("invalid manifest locator '{locator}': {source}")]
    InvalidLocator {
        locator: String,
        #[source]
        source: url::ParseError,
    },

    /// A manifest asset could not be fetched at all
    #[error("manifest asset {url} unreachable: {source}")]
    AssetUnreachable {
        url: String,
        #[source]
        source: NetworkError,
    },

    /// A manifest asset answered with a non-2xx status
    #[error("manifest asset {url} returned status {status}")]
    AssetRejected { url: String, status: u16 },

    /// The snapshot store failed
    #[error("snapshot store failed: {0}")]
    Store(#[from] StoreError),

    /// The task running the transition panicked or was cancelled
    #[error("lifecycle task did not settle: {0}")]
    Aborted(#[from] tokio::task::JoinError),

    /// A newer registration pre-empted this installation
    #[error("installation of '{0}' was superseded by a newer registration")]
    Superseded(String),
}

/// Pending lifecycle work
///
/// Holds the spawned transition until someone awaits [`LifecycleTask::settled`].
#[must_use = "lifecycle work must be awaited until it settles"]
#[derive(Debug)]
pub struct LifecycleTask<T> {
    handle: JoinHandle<Result<T, LifecycleError>>,
}

impl<T: Send + 'static> LifecycleTask<T> {
    pub fn spawn<F>(work: F) -> Self
    where
        F: Future<Output = Result<T, LifecycleError>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(work),
        }
    }

    /// Waits for the transition to finish and returns its outcome
    pub async fn settled(self) -> Result<T, LifecycleError> {
        self.handle.await?
    }
}

/// Result of a completed activation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Generation now current
    pub current: String,
    /// Stale generations that were deleted
    pub removed: Vec<String>,
    /// Stale generations whose deletion failed; they stay until the next activation
    pub failed: Vec<String>,
}

/// Fetches every manifest asset and builds the candidate generation
///
/// Assets are fetched concurrently and must all answer with a 2xx status.
/// Nothing touches the store.
pub async fn fetch_candidate(
    network: Arc<dyn Network>,
    origin: Url,
    manifest: AssetManifest,
) -> Result<Generation, LifecycleError> {
    let urls = manifest.resolve(&origin)?;
    tracing::info!(version = %manifest.version, assets = urls.len(), "caching app shell");

    let network = network.as_ref();
    let fetches = urls.into_iter().map(|url| async move {
        let request = Request::get(url);
        let response = network
            .fetch(&request)
            .await
            .map_err(|source| LifecycleError::AssetUnreachable {
                url: request.url.to_string(),
                source,
            })?;
        if !response.is_ok() {
            return Err(LifecycleError::AssetRejected {
                url: request.url.to_string(),
                status: response.status,
            });
        }
        Ok(Snapshot::capture(request.key(), &response))
    });
    let snapshots = try_join_all(fetches).await?;

    let mut candidate = Generation::new(manifest.version.clone(), manifest.fingerprint());
    for snapshot in snapshots {
        candidate.insert(snapshot);
    }
    Ok(candidate)
}

/// Builds and commits the generation for `manifest`
///
/// Nothing is written to the store unless every asset was fetched; the
/// candidate is then committed in one step. The generation is not promoted
/// here.
pub async fn install(
    store: Arc<dyn SnapshotStore>,
    network: Arc<dyn Network>,
    origin: Url,
    manifest: AssetManifest,
) -> Result<GenerationInfo, LifecycleError> {
    let candidate = fetch_candidate(network, origin, manifest).await?;
    let info = store.commit(candidate).await?;
    tracing::info!(generation = %info.name, entries = info.entries, "app shell cached");
    Ok(info)
}

/// Promotes `version` and removes every other generation
///
/// Only the promotion can fail the activation. Stale deletions run
/// concurrently and are each allowed to fail on their own.
pub async fn activate(
    store: Arc<dyn SnapshotStore>,
    version: String,
) -> Result<ActivationReport, LifecycleError> {
    store.promote(&version).await?;
    tracing::info!(generation = %version, "activated");

    let mut report = ActivationReport {
        current: version.clone(),
        ..Default::default()
    };

    let names = match store.generation_names().await {
        Ok(names) => names,
        Err(e) => {
            tracing::warn!(error = %e, "could not enumerate generations; stale ones are kept");
            return Ok(report);
        }
    };

    let store = store.as_ref();
    let deletions = names
        .into_iter()
        .filter(|name| *name != version)
        .map(|name| async move {
            tracing::info!(generation = %name, "removing old generation");
            let result = store.delete_generation(&name).await;
            (name, result)
        });

    for (name, result) in join_all(deletions).await {
        match result {
            Ok(_) => report.removed.push(name),
            Err(e) => {
                tracing::warn!(generation = %name, error = %e, "failed to remove old generation");
                report.failed.push(name);
            }
        }
    }

    Ok(report)
}
