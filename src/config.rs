//! Configuration management
//!
//! Handles TOML configuration parsing, validation, and atomic updates

use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_JOIN_TIMEOUT, DEFAULT_POLLING_INTERVAL, DEFAULT_POLL_INTERVAL,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_STOP_GRACE, DEFAULT_TARGET_CLASS, POLLING_INTERVAL_MAX,
    POLLING_INTERVAL_MIN,
};
use crate::models::MonitorError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MonitorConfiguration {
    pub monitor: MonitorSettings,
    pub source: SourceSettings,
}

/// Lifecycle and delivery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Maximum buffered events in pull mode (oldest dropped beyond this)
    pub queue_capacity: usize,
    /// How often the background thread checks for a stop request
    pub poll_interval_ms: u64,
    /// Pause before cleanup starts waiting for the background thread
    pub stop_grace_ms: u64,
    /// How long cleanup waits for the background thread before detaching it
    pub join_timeout_ms: u64,
}

/// Instrumentation source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Polling interval in seconds (0.1-300.0)
    pub polling_interval: f64,
    /// Object class whose creation and deletion are watched
    pub target_class: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            stop_grace_ms: DEFAULT_STOP_GRACE.as_millis() as u64,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT.as_millis() as u64,
        }
    }
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            polling_interval: DEFAULT_POLLING_INTERVAL,
            target_class: DEFAULT_TARGET_CLASS.to_string(),
        }
    }
}

impl SourceSettings {
    /// Polling interval as a Duration
    pub fn polling_duration(&self) -> Duration {
        Duration::from_secs_f64(
            self.polling_interval
                .clamp(POLLING_INTERVAL_MIN, POLLING_INTERVAL_MAX),
        )
    }
}

impl MonitorConfiguration {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;

        let config: MonitorConfiguration = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise from the default location if it exists
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => match Self::default_config_path() {
                Ok(default_path) if default_path.exists() => Self::load_from_file(&default_path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Write configuration atomically (temp file + rename)
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create configuration directory: {}", parent.display())
                })?;
            }
        }

        let content = self.to_toml()?;
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, content)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        std::fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let interval = self.source.polling_interval;
        if !(POLLING_INTERVAL_MIN..=POLLING_INTERVAL_MAX).contains(&interval) {
            return Err(MonitorError::InvalidInterval(interval).into());
        }

        if self.monitor.queue_capacity == 0 {
            anyhow::bail!("Invalid queue_capacity: must be at least 1");
        }

        if self.source.target_class.trim().is_empty() {
            anyhow::bail!("Invalid target_class: must not be empty");
        }

        Ok(())
    }

    /// `<config dir>/procwatch/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("Could not determine configuration directory")?;
        Ok(base.join("procwatch").join(CONFIG_FILE_NAME))
    }
}
