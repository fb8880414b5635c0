//! Application configuration with layered loading
//!
//! Sources, highest precedence first:
//!
//! 1. Environment variables (`MERIDIAN_*`, `__` separates nested keys)
//! 2. TOML file (`--config`, or `MERIDIAN_CONFIG_FILE`)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::agent::{AgentSettings, PayloadPointers};
use crate::intermediary::AssetManifest;

mod validation;

pub use validation::ConfigError;

/// Environment variable naming a TOML config file
pub const CONFIG_FILE_ENV: &str = "MERIDIAN_CONFIG_FILE";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Snapshot store directory; the XDG cache directory when unset
    #[serde(default)]
    pub store_dir: Option<PathBuf>,

    /// Preference file; the XDG data directory when unset
    #[serde(default)]
    pub prefs_path: Option<PathBuf>,

    /// Origin the dashboard is served from; also the intermediary's scope
    #[serde(default = "default_origin")]
    pub origin: String,

    /// HTTP request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Forecast URL template with a `{location}` placeholder
    #[serde(default = "default_forecast_url")]
    pub forecast_url: String,

    /// Air-quality URL template with `{lat}`, `{long}` and `{key}` placeholders
    #[serde(default = "default_air_quality_url")]
    pub air_quality_url: String,

    #[serde(default)]
    pub air_quality_key: String,

    /// Write live responses back into the current generation
    #[serde(default = "default_true")]
    pub store_dynamic: bool,

    #[serde(default)]
    pub pointers: PayloadPointers,

    /// App shell installed by `meridian install`
    #[serde(default)]
    pub manifest: AssetManifest,

    /// Default interval for `meridian watch`
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

fn default_origin() -> String {
    "http://localhost:8080/".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_user_agent() -> String {
    concat!("meridian/", env!("CARGO_PKG_VERSION")).into()
}

fn default_forecast_url() -> String {
    AgentSettings::default().forecast_url
}

fn default_air_quality_url() -> String {
    AgentSettings::default().air_quality_url
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval_secs() -> u64 {
    600
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_dir: None,
            prefs_path: None,
            origin: default_origin(),
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            forecast_url: default_forecast_url(),
            air_quality_url: default_air_quality_url(),
            air_quality_key: String::new(),
            store_dynamic: true,
            pointers: PayloadPointers::default(),
            manifest: AssetManifest::default(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Loads configuration, reading the TOML file named by `MERIDIAN_CONFIG_FILE` if set
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration; `file` takes precedence over `MERIDIAN_CONFIG_FILE`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source cannot be parsed or validation fails.
    pub fn load_from(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from));
        if let Some(path) = &file {
            if !path.exists() {
                return Err(ConfigError::LoadFailed(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            tracing::debug!(path = %path.display(), "reading config file");
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(
            Env::prefixed("MERIDIAN_")
                .ignore(&["CONFIG_FILE", "LOG"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.origin).map_err(|e| ConfigError::Invalid {
            field: "origin".into(),
            reason: e.to_string(),
        })
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            forecast_url: self.forecast_url.clone(),
            air_quality_url: self.air_quality_url.clone(),
            air_quality_key: self.air_quality_key.clone(),
            pointers: self.pointers.clone(),
            store_dynamic: self.store_dynamic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(contents: &str) -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("meridian.toml");
        std::fs::write(&path, contents).unwrap();
        (temp_dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.origin, "http://localhost:8080/");
        assert_eq!(config.timeout_ms, 20_000);
        assert!(config.user_agent.starts_with("meridian/"));
        assert!(config.store_dynamic);
        assert!(config.store_dir.is_none());
        assert_eq!(config.manifest, AssetManifest::default());
        assert_eq!(config.refresh_interval(), Duration::from_secs(600));
    }

    #[test]
    fn test_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let (_temp_dir, path) = write_config(
            r#"
            origin = "https://weather.example/"
            timeout_ms = 5000

            [manifest]
            version = "v2"
            assets = ["/", "/app.js"]

            [pointers]
            created = "/meta/created"
            "#,
        );

        let config = AppConfig::load_from(Some(&path)).unwrap();

        assert_eq!(config.origin, "https://weather.example/");
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.manifest, AssetManifest::new("v2", ["/", "/app.js"]));
        assert_eq!(config.pointers.created, "/meta/created");
        assert_eq!(config.pointers.results, PayloadPointers::default().results);
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = AppConfig::load_from(Some(&temp_dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::LoadFailed(_))));
    }

    #[test]
    fn test_load_from_rejects_invalid_values() {
        let (_temp_dir, path) = write_config("timeout_ms = 10\n");
        let result = AppConfig::load_from(Some(&path));
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_agent_settings_follow_config() {
        let config = AppConfig {
            air_quality_key: "secret".into(),
            store_dynamic: false,
            ..Default::default()
        };
        let settings = config.agent_settings();
        assert_eq!(settings.air_quality_key, "secret");
        assert!(!settings.store_dynamic);
        assert_eq!(settings.forecast_url, config.forecast_url);
    }
}
