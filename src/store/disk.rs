//! On-disk snapshot store
//!
//! Layout under the store root:
//!
//! ```text
//! CURRENT                                name of the current generation
//! generations/<sha256(name)>.json        name, fingerprint, created_at, data dir
//! data/<sha256(name)>.<nonce>/
//!     entries/<sha256(key)>.json         one snapshot per file
//! staging/                               candidates being assembled
//! trash/                                 data directories on their way out
//! ```
//!
//! Every record is written to a temporary file and renamed into place, so a
//! single key write or a `CURRENT` update is atomic. A generation exists once
//! its pointer file under `generations/` exists. A commit assembles its
//! entries under `staging/`, moves them to a fresh directory under `data/`
//! and then rewrites the pointer. Replacing a generation is therefore one
//! rename of the pointer file: readers see either the old data directory or
//! the new one, never neither. The old directory is discarded afterwards.
//! A crash at any point leaves the previous pointer intact, and debris in
//! `staging/`, `trash/` or unreferenced `data/` directories is removed by
//! [`DiskSnapshotStore::sweep_leftovers`].

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use super::{
    digest, Generation, GenerationInfo, RequestKey, Snapshot, SnapshotStore, StoreError,
};

const CURRENT_FILE: &str = "CURRENT";

/// Pointer file naming a generation and the directory holding its entries
#[derive(Debug, Serialize, Deserialize)]
struct GenerationMeta {
    name: String,
    fingerprint: String,
    created_at: DateTime<Utc>,
    dir: String,
}

/// Snapshot store persisted as JSON files
///
/// By default the store lives in an XDG-compliant cache directory
/// (`~/.cache/meridian/snapshots/` on Linux).
#[derive(Debug, Clone)]
pub struct DiskSnapshotStore {
    root: PathBuf,
    // Commits and inserts within this process; lookups never wait on it
    write_lock: Arc<Mutex<()>>,
}

impl DiskSnapshotStore {
    /// Creates a store in the XDG cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "meridian")?;
        Some(Self::with_dir(project_dirs.cache_dir().join("snapshots")))
    }

    /// Creates a store rooted at a custom directory
    pub fn with_dir(root: PathBuf) -> Self {
        Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generations_dir(&self) -> PathBuf {
        self.root.join("generations")
    }

    fn pointer_path(&self, name: &str) -> PathBuf {
        self.generations_dir().join(format!("{}.json", digest(name)))
    }

    fn data_dir(&self, dir: &str) -> PathBuf {
        self.root.join("data").join(dir)
    }

    fn entry_path(data_dir: &Path, key: &RequestKey) -> PathBuf {
        data_dir
            .join("entries")
            .join(format!("{}.json", key.digest()))
    }

    /// Unique suffix for staging, data and trash directories
    fn nonce() -> String {
        format!(
            "{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        )
    }

    /// Moves a directory under `trash/` and then removes it
    ///
    /// A directory that is already gone counts as discarded.
    async fn discard_dir(&self, dir: &Path) -> Result<(), StoreError> {
        let trash = self.root.join("trash");
        fs::create_dir_all(&trash).await?;
        let file_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = trash.join(format!("{}.{}", file_name, Self::nonce()));
        match fs::rename(dir, &target).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = fs::remove_dir_all(&target).await {
            tracing::warn!(path = %target.display(), error = %e, "failed to remove discarded directory");
        }
        Ok(())
    }

    /// Removes debris left by an interrupted process
    ///
    /// Clears `staging/` and `trash/`, and drops every `data/` directory that
    /// no generation pointer refers to. Run it before the store is shared.
    pub async fn sweep_leftovers(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        for dir in ["staging", "trash"] {
            match fs::remove_dir_all(self.root.join(dir)).await {
                Ok(()) => tracing::debug!(dir, "removed leftover store directory"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let referenced: HashSet<String> = self
            .read_pointers()
            .await?
            .into_iter()
            .map(|meta| meta.dir)
            .collect();
        let mut dirs = match fs::read_dir(self.root.join("data")).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(dir) = dirs.next_entry().await? {
            let name = dir.file_name().to_string_lossy().into_owned();
            if !referenced.contains(&name) {
                tracing::debug!(dir = %name, "removing unreferenced data directory");
                fs::remove_dir_all(dir.path()).await?;
            }
        }
        Ok(())
    }

    async fn read_meta(&self, name: &str) -> Result<Option<GenerationMeta>, StoreError> {
        read_json(&self.pointer_path(name)).await
    }

    async fn read_pointers(&self) -> Result<Vec<GenerationMeta>, StoreError> {
        let mut files = match fs::read_dir(self.generations_dir()).await {
            Ok(files) => files,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut pointers = Vec::new();
        while let Some(file) = files.next_entry().await? {
            let path = file.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            if let Some(meta) = read_json(&path).await? {
                pointers.push(meta);
            }
        }
        Ok(pointers)
    }

    async fn count_entries(data_dir: &Path) -> Result<usize, StoreError> {
        let mut count = 0;
        let mut entries = match fs::read_dir(data_dir.join("entries")).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Copies entries of `from` that `to` does not already hold
    async fn carry_over(from: &Path, to: &Path) -> Result<usize, StoreError> {
        let mut carried = 0;
        let mut entries = match fs::read_dir(from.join("entries")).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let target = to.join("entries").join(entry.file_name());
            if !fs::try_exists(&target).await? {
                fs::copy(&path, &target).await?;
                carried += 1;
            }
        }
        Ok(carried)
    }
}

/// Writes JSON to `path` via a temporary file and rename
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Reads JSON from `path`, returning `None` if the file does not exist
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl SnapshotStore for DiskSnapshotStore {
    async fn generations(&self) -> Result<Vec<GenerationInfo>, StoreError> {
        let mut infos = Vec::new();
        for meta in self.read_pointers().await? {
            let entries = Self::count_entries(&self.data_dir(&meta.dir)).await?;
            infos.push(GenerationInfo {
                name: meta.name,
                fingerprint: meta.fingerprint,
                created_at: meta.created_at,
                entries,
            });
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn commit(&self, candidate: Generation) -> Result<GenerationInfo, StoreError> {
        let dir = format!("{}.{}", digest(&candidate.name), Self::nonce());
        let staging = self.root.join("staging").join(&dir);
        fs::create_dir_all(staging.join("entries")).await?;

        for snapshot in candidate.entries() {
            write_json(&Self::entry_path(&staging, &snapshot.key), snapshot).await?;
        }

        let _guard = self.write_lock.lock().await;
        let previous = self.read_meta(&candidate.name).await?;
        if let Some(previous) = &previous {
            let carried = Self::carry_over(&self.data_dir(&previous.dir), &staging).await?;
            tracing::debug!(generation = %candidate.name, carried, "carried over existing entries");
        }

        let data_dir = self.data_dir(&dir);
        fs::create_dir_all(self.root.join("data")).await?;
        fs::rename(&staging, &data_dir).await?;

        let meta = GenerationMeta {
            name: candidate.name.clone(),
            fingerprint: candidate.fingerprint.clone(),
            created_at: Utc::now(),
            dir,
        };
        write_json(&self.pointer_path(&meta.name), &meta).await?;

        // Visible from here on; the old directory is only reclaimable space
        if let Some(previous) = previous {
            if let Err(e) = self.discard_dir(&self.data_dir(&previous.dir)).await {
                tracing::warn!(generation = %meta.name, error = %e, "failed to discard replaced data directory");
            }
        }

        let entries = Self::count_entries(&data_dir).await?;
        Ok(GenerationInfo {
            name: meta.name,
            fingerprint: meta.fingerprint,
            created_at: meta.created_at,
            entries,
        })
    }

    async fn delete_generation(&self, name: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(meta) = self.read_meta(name).await? else {
            return Ok(false);
        };
        if self.current().await?.as_deref() == Some(name) {
            fs::remove_file(self.root.join(CURRENT_FILE)).await?;
        }
        fs::remove_file(self.pointer_path(name)).await?;
        self.discard_dir(&self.data_dir(&meta.dir)).await?;
        Ok(true)
    }

    async fn current(&self) -> Result<Option<String>, StoreError> {
        let name = match fs::read_to_string(self.root.join(CURRENT_FILE)).await {
            Ok(content) => content.trim().to_string(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if name.is_empty() || self.read_meta(&name).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(name))
    }

    async fn promote(&self, name: &str) -> Result<(), StoreError> {
        if self.read_meta(name).await?.is_none() {
            return Err(StoreError::GenerationNotFound(name.to_string()));
        }
        let path = self.root.join(CURRENT_FILE);
        let tmp = self.root.join("CURRENT.tmp");
        fs::write(&tmp, name.as_bytes()).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<Snapshot>, StoreError> {
        let Some(mut meta) = self.read_meta(generation).await? else {
            return Ok(None);
        };
        // A commit may swap the data directory between reading the pointer and
        // reading the entry; a miss is only final once the pointer is stable.
        loop {
            let found = read_json(&Self::entry_path(&self.data_dir(&meta.dir), key)).await?;
            if found.is_some() {
                return Ok(found);
            }
            match self.read_meta(generation).await? {
                Some(latest) if latest.dir != meta.dir => meta = latest,
                _ => return Ok(None),
            }
        }
    }

    async fn insert(&self, generation: &str, snapshot: Snapshot) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(meta) = self.read_meta(generation).await? else {
            return Err(StoreError::GenerationNotFound(generation.to_string()));
        };
        write_json(&Self::entry_path(&self.data_dir(&meta.dir), &snapshot.key), &snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Response;
    use tempfile::TempDir;
    use url::Url;

    fn create_test_store() -> (DiskSnapshotStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = DiskSnapshotStore::with_dir(temp_dir.path().to_path_buf());
        (store, temp_dir)
    }

    fn snapshot(path: &str, body: &str) -> Snapshot {
        let url = Url::parse("http://localhost:8080").unwrap().join(path).unwrap();
        let response = Response {
            url: url.clone(),
            status: 200,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: body.as_bytes().to_vec(),
        };
        Snapshot::capture(RequestKey::get(&url), &response)
    }

    fn candidate(name: &str, paths: &[&str]) -> Generation {
        let mut generation = Generation::new(name, format!("fp-{}", name));
        for path in paths {
            generation.insert(snapshot(path, path));
        }
        generation
    }

    #[tokio::test]
    async fn test_empty_store_has_no_generations() {
        let (store, _temp_dir) = create_test_store();
        assert!(store.generations().await.unwrap().is_empty());
        assert!(store.current().await.unwrap().is_none());
    }

    fn data_dirs(temp_dir: &TempDir) -> Vec<PathBuf> {
        match std::fs::read_dir(temp_dir.path().join("data")) {
            Ok(dirs) => dirs.map(|d| d.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_commit_writes_pointer_and_data_directory() {
        let (store, temp_dir) = create_test_store();
        let info = store.commit(candidate("v1", &["/", "/a.css"])).await.unwrap();

        assert_eq!(info.entries, 2);
        let pointer = temp_dir
            .path()
            .join("generations")
            .join(format!("{}.json", digest("v1")));
        assert!(pointer.exists(), "pointer should exist");
        let dirs = data_dirs(&temp_dir);
        assert_eq!(dirs.len(), 1);
        assert!(dirs[0].join("entries").is_dir());
        let staged = std::fs::read_dir(temp_dir.path().join("staging")).unwrap().count();
        assert_eq!(staged, 0, "staging should have been renamed away");
    }

    #[tokio::test]
    async fn test_generation_names_survive_reopen() {
        let (store, temp_dir) = create_test_store();
        store.commit(candidate("WeatherCache_v1.17", &["/"])).await.unwrap();
        store.promote("WeatherCache_v1.17").await.unwrap();

        let reopened = DiskSnapshotStore::with_dir(temp_dir.path().to_path_buf());
        assert_eq!(
            reopened.generation_names().await.unwrap(),
            vec!["WeatherCache_v1.17"]
        );
        assert_eq!(
            reopened.current().await.unwrap().as_deref(),
            Some("WeatherCache_v1.17")
        );
    }

    #[tokio::test]
    async fn test_lookup_returns_stored_snapshot() {
        let (store, _temp_dir) = create_test_store();
        store.commit(candidate("v1", &["/a.css"])).await.unwrap();

        let found = store
            .lookup("v1", &snapshot("/a.css", "").key)
            .await
            .unwrap()
            .expect("entry should exist");
        assert_eq!(found.body, b"/a.css");
        assert_eq!(found.status, 200);
    }

    #[tokio::test]
    async fn test_lookup_missing_key_and_generation_are_misses() {
        let (store, _temp_dir) = create_test_store();
        store.commit(candidate("v1", &["/"])).await.unwrap();

        assert!(store.lookup("v1", &snapshot("/nope", "").key).await.unwrap().is_none());
        assert!(store.lookup("v2", &snapshot("/", "").key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_overwrites_existing_entry() {
        let (store, _temp_dir) = create_test_store();
        store.commit(candidate("v1", &[])).await.unwrap();

        store.insert("v1", snapshot("/api", "first")).await.unwrap();
        store.insert("v1", snapshot("/api", "second")).await.unwrap();

        let found = store.lookup("v1", &snapshot("/api", "").key).await.unwrap().unwrap();
        assert_eq!(found.body, b"second");
        assert_eq!(store.generations().await.unwrap()[0].entries, 1);
    }

    #[tokio::test]
    async fn test_insert_into_missing_generation_fails() {
        let (store, _temp_dir) = create_test_store();
        let result = store.insert("v1", snapshot("/api", "x")).await;
        assert!(matches!(result, Err(StoreError::GenerationNotFound(_))));
    }

    #[tokio::test]
    async fn test_recommit_replaces_and_carries_over() {
        let (store, _temp_dir) = create_test_store();
        store.commit(candidate("v1", &["/"])).await.unwrap();
        store.insert("v1", snapshot("/api", "dynamic")).await.unwrap();

        let mut again = Generation::new("v1", "fp-v1");
        again.insert(snapshot("/", "fresh"));
        let info = store.commit(again).await.unwrap();

        assert_eq!(info.entries, 2);
        let root = store.lookup("v1", &snapshot("/", "").key).await.unwrap().unwrap();
        assert_eq!(root.body, b"fresh");
        assert!(store.lookup("v1", &snapshot("/api", "").key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_recommit_discards_replaced_data_directory() {
        let (store, temp_dir) = create_test_store();
        store.commit(candidate("v1", &["/"])).await.unwrap();
        let first = data_dirs(&temp_dir);

        store.commit(candidate("v1", &["/"])).await.unwrap();

        let second = data_dirs(&temp_dir);
        assert_eq!(second.len(), 1);
        assert_ne!(first, second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_recommit_of_current_generation_stays_visible() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let (store, _temp_dir) = create_test_store();
        store.commit(candidate("v1", &["/", "/a.css"])).await.unwrap();
        store.promote("v1").await.unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let store = store.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let key = snapshot("/a.css", "").key;
                loop {
                    assert_eq!(store.current().await.unwrap().as_deref(), Some("v1"));
                    assert!(store.lookup_current(&key).await.unwrap().is_some());
                    if done.load(Ordering::Relaxed) {
                        break;
                    }
                }
            })
        };

        for _ in 0..20 {
            store.commit(candidate("v1", &["/", "/a.css"])).await.unwrap();
        }
        done.store(true, Ordering::Relaxed);

        reader.await.unwrap();
        assert_eq!(store.generation_names().await.unwrap(), vec!["v1"]);
    }

    #[tokio::test]
    async fn test_interrupted_recommit_keeps_previous_generation() {
        let (store, temp_dir) = create_test_store();
        store.commit(candidate("v1", &["/"])).await.unwrap();
        store.promote("v1").await.unwrap();
        // A crash after the candidate reached data/ but before its pointer was written
        let orphan = temp_dir
            .path()
            .join("data")
            .join(format!("{}.crashed", digest("v1")))
            .join("entries");
        std::fs::create_dir_all(&orphan).unwrap();
        std::fs::write(orphan.join("x.json"), "{}").unwrap();

        assert_eq!(store.current().await.unwrap().as_deref(), Some("v1"));
        assert_eq!(store.generations().await.unwrap()[0].entries, 1);

        store.sweep_leftovers().await.unwrap();

        assert_eq!(data_dirs(&temp_dir).len(), 1);
        assert!(!orphan.exists());
        let root = store.lookup("v1", &snapshot("/", "").key).await.unwrap();
        assert!(root.is_some());
    }

    #[tokio::test]
    async fn test_promote_requires_committed_generation() {
        let (store, _temp_dir) = create_test_store();
        let result = store.promote("v1").await;
        assert!(matches!(result, Err(StoreError::GenerationNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_generation_removes_directory() {
        let (store, temp_dir) = create_test_store();
        store.commit(candidate("v1", &["/"])).await.unwrap();
        store.commit(candidate("v2", &["/"])).await.unwrap();
        store.promote("v2").await.unwrap();

        assert!(store.delete_generation("v1").await.unwrap());
        assert!(!temp_dir
            .path()
            .join("generations")
            .join(format!("{}.json", digest("v1")))
            .exists());
        assert_eq!(data_dirs(&temp_dir).len(), 1, "only v2 data should remain");
        assert_eq!(store.generation_names().await.unwrap(), vec!["v2"]);
        assert_eq!(store.current().await.unwrap().as_deref(), Some("v2"));
        assert!(!store.delete_generation("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_incomplete_staging_is_never_listed() {
        let (store, temp_dir) = create_test_store();
        let debris = temp_dir.path().join("staging").join("abc.123").join("entries");
        std::fs::create_dir_all(&debris).unwrap();

        assert!(store.generations().await.unwrap().is_empty());

        store.sweep_leftovers().await.unwrap();
        assert!(!temp_dir.path().join("staging").exists());
    }

    #[tokio::test]
    async fn test_current_pointing_at_missing_generation_is_none() {
        let (store, temp_dir) = create_test_store();
        std::fs::write(temp_dir.path().join(CURRENT_FILE), "v1").unwrap();
        assert!(store.current().await.unwrap().is_none());
    }

    #[test]
    fn test_new_creates_xdg_compliant_path() {
        if let Some(store) = DiskSnapshotStore::new() {
            let path_str = store.root.to_string_lossy();
            assert!(
                path_str.contains("meridian"),
                "Store path should contain project name"
            );
        }
        // Test passes if new() returns None (e.g., no home directory in CI)
    }
}
