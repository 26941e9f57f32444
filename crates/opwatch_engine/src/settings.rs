use std::fs;
use std::path::Path;
use std::time::Duration;

use opwatch_logging::{op_info, op_warn};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    /// Root of the API; workspace routes live under `{base_url}/projects/{id}/`.
    pub base_url: String,
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    /// Applies to single-shot requests only. Streams have no overall timeout.
    pub request_timeout: Duration,
    /// Re-fetch partial read models while runs are in flight.
    pub refresh_partial_results: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api/".to_string(),
            poll_interval: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            refresh_partial_results: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse settings: {0}")]
    Parse(String),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// On-disk shape; every field is optional and falls back to the default.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    base_url: Option<String>,
    poll_interval_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    refresh_partial_results: Option<bool>,
}

impl ClientSettings {
    pub fn from_ron_str(text: &str) -> Result<Self, SettingsError> {
        let file: SettingsFile =
            ron::from_str(text).map_err(|err| SettingsError::Parse(err.to_string()))?;
        let defaults = Self::default();
        let settings = Self {
            base_url: file.base_url.unwrap_or(defaults.base_url),
            poll_interval: file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            connect_timeout: file
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            request_timeout: file
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            refresh_partial_results: file
                .refresh_partial_results
                .unwrap_or(defaults.refresh_partial_results),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a RON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                op_info!("No settings at {:?}; using defaults", path);
                return Ok(Self::default());
            }
            Err(err) => {
                op_warn!("Failed to read settings from {:?}: {}", path, err);
                return Err(err.into());
            }
        };
        let settings = Self::from_ron_str(&text)?;
        op_info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|err| SettingsError::Invalid(format!("base_url: {err}")))?;
        if url.cannot_be_a_base() {
            return Err(SettingsError::Invalid(format!(
                "base_url cannot be a base: {}",
                self.base_url
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(SettingsError::Invalid(
                "poll_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
