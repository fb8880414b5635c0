//! Versioned snapshot store
//!
//! The store holds named generations of (request key → snapshot) pairs. At
//! most one generation is current; lookups made on behalf of pages go against
//! that one. Generations become visible only through [`SnapshotStore::commit`],
//! which publishes a fully built candidate in a single step.
//!
//! Two writers share the store: the lifecycle manager (commit, promote, delete
//! generation) and the forecast agent, which inserts dynamic entries into the
//! current generation after a successful live fetch. Individual key writes are
//! last-write-wins; nothing coordinates the two writers.

mod disk;
mod memory;
mod snapshot;

use async_trait::async_trait;
use thiserror::Error;

pub use disk::DiskSnapshotStore;
pub use memory::MemorySnapshotStore;
pub use snapshot::{Generation, GenerationInfo, RequestKey, Snapshot};

pub(crate) use snapshot::digest;

/// Errors raised by snapshot store backends
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named generation does not exist
    #[error("generation not found: {0}")]
    GenerationNotFound(String),

    /// Filesystem access failed
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be decoded
    #[error("corrupt store record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Async interface over a versioned snapshot store
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Lists committed generations ordered by name
    async fn generations(&self) -> Result<Vec<GenerationInfo>, StoreError>;

    /// Publishes a candidate generation in one step
    ///
    /// If a generation with the same name already exists it is replaced, and
    /// entries it held under keys the candidate does not contain are carried
    /// over.
    async fn commit(&self, candidate: Generation) -> Result<GenerationInfo, StoreError>;

    /// Deletes a generation; returns `false` if it did not exist
    async fn delete_generation(&self, name: &str) -> Result<bool, StoreError>;

    /// Name of the current generation, if any has been promoted
    async fn current(&self) -> Result<Option<String>, StoreError>;

    /// Makes `name` the current generation
    async fn promote(&self, name: &str) -> Result<(), StoreError>;

    /// Looks up a snapshot in a specific generation
    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<Snapshot>, StoreError>;

    /// Stores a snapshot in an existing generation, replacing any previous one
    async fn insert(&self, generation: &str, snapshot: Snapshot) -> Result<(), StoreError>;

    /// Names of all committed generations
    async fn generation_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .generations()
            .await?
            .into_iter()
            .map(|g| g.name)
            .collect())
    }

    /// Looks up a snapshot in the current generation
    async fn lookup_current(&self, key: &RequestKey) -> Result<Option<Snapshot>, StoreError> {
        match self.current().await? {
            Some(name) => self.lookup(&name, key).await,
            None => Ok(None),
        }
    }

    /// Stores a snapshot in the current generation
    ///
    /// Returns the generation written to, or `None` when nothing is current yet.
    async fn insert_current(&self, snapshot: Snapshot) -> Result<Option<String>, StoreError> {
        match self.current().await? {
            Some(name) => {
                self.insert(&name, snapshot).await?;
                Ok(Some(name))
            }
            None => Ok(None),
        }
    }
}
