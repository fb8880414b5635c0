//! Configuration validation rules

use thiserror::Error;

use crate::config::AppConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

fn require_placeholders(field: &str, template: &str, placeholders: &[&str]) -> Result<(), ConfigError> {
    for placeholder in placeholders {
        if !template.contains(placeholder) {
            return Err(invalid(field, format!("template must contain {placeholder}")));
        }
    }
    Ok(())
}

impl AppConfig {
    /// Validates loaded values
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - the manifest version label is empty
    /// - `origin` is not an absolute URL
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    /// - a URL template lacks one of its placeholders
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manifest.version.trim().is_empty() {
            return Err(invalid("manifest.version", "must not be empty"));
        }

        self.origin_url()?;

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        require_placeholders("forecast_url", &self.forecast_url, &["{location}"])?;
        require_placeholders("air_quality_url", &self.air_quality_url, &["{lat}", "{long}", "{key}"])?;

        if self.refresh_interval_secs == 0 {
            return Err(invalid("refresh_interval_secs", "must be greater than 0"));
        }

        if self.manifest.assets.is_empty() {
            tracing::warn!(version = %self.manifest.version, "manifest lists no assets");
        }

        Ok(())
    }

    /// The air-quality key, required before air-quality requests can succeed
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no key is configured.
    pub fn require_air_quality_key(&self) -> Result<&str, ConfigError> {
        if self.air_quality_key.is_empty() {
            return Err(ConfigError::Missing {
                field: "air_quality_key".into(),
                hint: "Set MERIDIAN_AIR_QUALITY_KEY environment variable".into(),
            });
        }
        Ok(&self.air_quality_key)
    }
}
