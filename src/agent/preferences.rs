//! Persistent key-value store for the user's locations
//!
//! All values live in one JSON object on disk (in the XDG data directory by
//! default). Writes go through a temporary file and a rename, and are
//! serialized within the process so read-modify-write cycles don't interleave.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

use super::payload::Coordinates;

/// Key holding the ordered list of preferred locations
pub const PREFERRED_LOCATIONS_KEY: &str = "preferredLocations";

/// Errors raised by the preference store
#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preference file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("preference file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON-file key-value store
#[derive(Debug)]
pub struct PreferenceStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl PreferenceStore {
    /// Creates a store at `~/.local/share/meridian/preferences.json` (or platform equivalent)
    ///
    /// Returns `None` if the data directory cannot be determined.
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "meridian")?;
        Some(Self::with_path(project_dirs.data_dir().join("preferences.json")))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, Value>, PreferenceError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, items: &BTreeMap<String, Value>) -> Result<(), PreferenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(items)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Reads a value; `None` if the key was never set
    pub async fn get_item<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PreferenceError> {
        let mut items = self.load().await?;
        match items.remove(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Writes a value, replacing any previous one
    pub async fn set_item<T: Serialize>(&self, key: &str, value: &T) -> Result<(), PreferenceError> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load().await?;
        items.insert(key.to_string(), serde_json::to_value(value)?);
        self.save(&items).await
    }

    pub async fn preferred_locations(&self) -> Result<Vec<String>, PreferenceError> {
        Ok(self
            .get_item::<Vec<String>>(PREFERRED_LOCATIONS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_preferred_locations(&self, locations: &[String]) -> Result<(), PreferenceError> {
        self.set_item(PREFERRED_LOCATIONS_KEY, &locations).await
    }

    /// Stored coordinates for a location
    pub async fn coordinates(&self, location: &str) -> Result<Option<Coordinates>, PreferenceError> {
        Ok(self
            .get_item::<String>(location)
            .await?
            .as_deref()
            .and_then(Coordinates::from_record))
    }

    pub async fn set_coordinates(
        &self,
        location: &str,
        coordinates: &Coordinates,
    ) -> Result<(), PreferenceError> {
        self.set_item(location, &coordinates.to_record()).await
    }
}
