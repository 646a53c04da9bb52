//! Configuration types for the Gradewatch client.
//!
//! Settings are read from `gradewatch.json` (camelCase keys). A missing file is
//! not an error: defaults point at a backend on `localhost:8000` polling every
//! two seconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GradewatchError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "gradewatch.json";

/// Environment variable overriding `apiUrl`.
pub const API_URL_ENV: &str = "GRADEWATCH_API_URL";

/// Default backend base URL.
fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

/// Default interval between status fetches, in milliseconds.
const fn default_poll_interval_ms() -> u64 {
    2000
}

/// Retry budget assumed until the server reports its own `max_retries`.
const fn default_max_retries() -> u32 {
    3
}

/// Main configuration for the Gradewatch client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the feedback backend (no trailing `/api`).
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Interval between status fetches in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Retry budget shown before the first successful fetch.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Custom `User-Agent` header for backend requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            poll_interval_ms: default_poll_interval_ms(),
            default_max_retries: default_max_retries(),
            user_agent: None,
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            GradewatchError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `gradewatch.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        Self::load_from_file(&config_path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `GradewatchError::ConfigParseError` if the file exists but
    /// contains invalid JSON, and `GradewatchError::ConfigValidationError` if
    /// the values are out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(GradewatchError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| GradewatchError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies the `GRADEWATCH_API_URL` environment override, if set.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        match std::env::var(API_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => self.with_api_url(url),
            _ => self,
        }
    }

    /// Replaces the backend base URL, trimming any trailing slash.
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.api_url = url.trim().trim_end_matches('/').to_string();
        self
    }

    /// Returns the poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validates the configuration values.
    ///
    /// - `apiUrl` must be non-empty and use `http://` or `https://`
    /// - `pollIntervalMs` must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(GradewatchError::config_validation(
                "apiUrl must not be empty",
                format!("Set apiUrl in your gradewatch.json or export {API_URL_ENV}"),
            ));
        }

        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(GradewatchError::config_validation(
                format!("apiUrl '{}' is not an http(s) URL", self.api_url),
                "Use a full URL such as http://localhost:8000",
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(GradewatchError::config_validation(
                "pollIntervalMs must be greater than 0",
                "Set pollIntervalMs to at least 1 in your gradewatch.json (2000 is the default)",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
