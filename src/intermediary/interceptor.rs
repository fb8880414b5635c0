//! Cache-first request interception

use std::sync::Arc;

use crate::network::{Network, NetworkError, Request, Response};
use crate::store::{RequestKey, Snapshot, SnapshotStore};

/// Where an intercepted response came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
    /// Served from the named generation without touching the network
    Snapshot { generation: String },
    /// Forwarded to the network and passed through unmodified
    Network,
}

/// A response handed back to a page together with its source
#[derive(Debug, Clone)]
pub struct InterceptedResponse {
    pub source: ResponseSource,
    pub response: Response,
}

impl InterceptedResponse {
    pub fn from_snapshot(&self) -> bool {
        matches!(self.source, ResponseSource::Snapshot { .. })
    }
}

/// Answers requests from the current generation, falling back to the network
///
/// Serving never writes to the store.
#[derive(Clone)]
pub struct Interceptor {
    store: Arc<dyn SnapshotStore>,
    network: Arc<dyn Network>,
}

impl Interceptor {
    pub fn new(store: Arc<dyn SnapshotStore>, network: Arc<dyn Network>) -> Self {
        Self { store, network }
    }

    /// Responds to `request`
    ///
    /// A store failure is treated as a miss so that the page still gets a
    /// response. The only error is a forward that could not reach the network.
    pub async fn respond(&self, request: &Request) -> Result<InterceptedResponse, NetworkError> {
        let key = request.key();

        match self.lookup(&key).await {
            Some((generation, snapshot)) => {
                tracing::debug!(%key, %generation, "serving from snapshot");
                return Ok(InterceptedResponse {
                    source: ResponseSource::Snapshot { generation },
                    response: snapshot.to_response(),
                });
            }
            None => tracing::debug!(%key, "snapshot miss, forwarding"),
        }

        self.forward(request).await
    }

    /// Sends `request` straight to the network
    pub async fn forward(&self, request: &Request) -> Result<InterceptedResponse, NetworkError> {
        let response = self.network.fetch(request).await?;
        Ok(InterceptedResponse {
            source: ResponseSource::Network,
            response,
        })
    }

    async fn lookup(&self, key: &RequestKey) -> Option<(String, Snapshot)> {
        let generation = match self.store.current().await {
            Ok(Some(generation)) => generation,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "could not read current generation");
                return None;
            }
        };
        match self.store.lookup(&generation, key).await {
            Ok(found) => found.map(|snapshot| (generation, snapshot)),
            Err(e) => {
                tracing::warn!(%key, error = %e, "snapshot lookup failed");
                None
            }
        }
    }
}
