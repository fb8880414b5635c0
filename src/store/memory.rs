//! In-memory snapshot store
//!
//! Used for ephemeral sessions and as the reference backend in tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{Generation, GenerationInfo, RequestKey, Snapshot, SnapshotStore, StoreError};

#[derive(Debug)]
struct StoredGeneration {
    fingerprint: String,
    created_at: DateTime<Utc>,
    entries: HashMap<RequestKey, Snapshot>,
}

impl StoredGeneration {
    fn info(&self, name: &str) -> GenerationInfo {
        GenerationInfo {
            name: name.to_string(),
            fingerprint: self.fingerprint.clone(),
            created_at: self.created_at,
            entries: self.entries.len(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    generations: BTreeMap<String, StoredGeneration>,
    current: Option<String>,
}

/// Snapshot store held entirely in memory
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    state: RwLock<State>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn generations(&self) -> Result<Vec<GenerationInfo>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .generations
            .iter()
            .map(|(name, generation)| generation.info(name))
            .collect())
    }

    async fn commit(&self, candidate: Generation) -> Result<GenerationInfo, StoreError> {
        let name = candidate.name.clone();
        let mut stored = StoredGeneration {
            fingerprint: candidate.fingerprint.clone(),
            created_at: Utc::now(),
            entries: candidate
                .into_entries()
                .into_iter()
                .map(|s| (s.key.clone(), s))
                .collect(),
        };

        let mut state = self.state.write().await;
        if let Some(previous) = state.generations.remove(&name) {
            for (key, snapshot) in previous.entries {
                stored.entries.entry(key).or_insert(snapshot);
            }
        }
        let info = stored.info(&name);
        state.generations.insert(name, stored);
        Ok(info)
    }

    async fn delete_generation(&self, name: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let existed = state.generations.remove(name).is_some();
        if state.current.as_deref() == Some(name) {
            state.current = None;
        }
        Ok(existed)
    }

    async fn current(&self) -> Result<Option<String>, StoreError> {
        Ok(self.state.read().await.current.clone())
    }

    async fn promote(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.generations.contains_key(name) {
            return Err(StoreError::GenerationNotFound(name.to_string()));
        }
        state.current = Some(name.to_string());
        Ok(())
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<Snapshot>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .generations
            .get(generation)
            .and_then(|g| g.entries.get(key))
            .cloned())
    }

    async fn insert(&self, generation: &str, snapshot: Snapshot) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let target = state
            .generations
            .get_mut(generation)
            .ok_or_else(|| StoreError::GenerationNotFound(generation.to_string()))?;
        target.entries.insert(snapshot.key.clone(), snapshot);
        Ok(())
    }
}
