//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, last used username, the session storage
//! backend and the session lifecycle thresholds.
//!
//! Configuration is stored at `~/.config/docdesk/config.json`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activity::ActivitySignal;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "docdesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default backend used when no URL is configured
const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(15 * 60);
const DEFAULT_WARNING_THRESHOLD: Duration = Duration::from_secs(13 * 60);
const DEFAULT_WATCHDOG_TICK: Duration = Duration::from_secs(10);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Tokens within this window of their expiry report `SessionStatus::Expiring`.
const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("warning threshold ({warning:?}) must be shorter than idle threshold ({idle:?})")]
    ThresholdOrder { warning: Duration, idle: Duration },

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error(
        "watchdog tick ({tick:?}) is coarser than the warning window ({window:?}); \
         the expiring-soon state could be skipped"
    )]
    TickTooCoarse { tick: Duration, window: Duration },

    #[error("at least one activity signal must be configured")]
    NoActivitySignals,
}

/// Timing and signal configuration for the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(rename = "idle_threshold_ms", with = "duration_ms")]
    pub idle_threshold: Duration,
    #[serde(rename = "warning_threshold_ms", with = "duration_ms")]
    pub warning_threshold: Duration,
    #[serde(rename = "watchdog_tick_interval_ms", with = "duration_ms")]
    pub watchdog_tick_interval: Duration,
    #[serde(rename = "notification_sweep_interval_ms", with = "duration_ms")]
    pub notification_sweep_interval: Duration,
    #[serde(rename = "refresh_buffer_ms", with = "duration_ms")]
    pub refresh_buffer: Duration,
    pub activity_signals: BTreeSet<ActivitySignal>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            watchdog_tick_interval: DEFAULT_WATCHDOG_TICK,
            notification_sweep_interval: DEFAULT_SWEEP_INTERVAL,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            activity_signals: ActivitySignal::default_set(),
        }
    }
}

impl SessionConfig {
    /// Check threshold ordering and interval sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("idle_threshold", self.idle_threshold),
            ("warning_threshold", self.warning_threshold),
            ("watchdog_tick_interval", self.watchdog_tick_interval),
            ("notification_sweep_interval", self.notification_sweep_interval),
        ];
        for (name, value) in required {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        if self.warning_threshold >= self.idle_threshold {
            return Err(ConfigError::ThresholdOrder {
                warning: self.warning_threshold,
                idle: self.idle_threshold,
            });
        }

        let window = self.warning_window();
        if self.watchdog_tick_interval > window {
            return Err(ConfigError::TickTooCoarse {
                tick: self.watchdog_tick_interval,
                window,
            });
        }

        if self.activity_signals.is_empty() {
            return Err(ConfigError::NoActivitySignals);
        }

        Ok(())
    }

    /// Time between the expiring-soon warning and the forced logout.
    pub fn warning_window(&self) -> Duration {
        self.idle_threshold.saturating_sub(self.warning_threshold)
    }
}

/// Where the durable session copy lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub last_username: Option<String>,
    pub storage: StorageBackend,
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            last_username: None,
            storage: StorageBackend::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from an explicit path. A missing file yields the defaults;
    /// invalid session thresholds are rejected here rather than at runtime.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Self = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };

        config
            .session
            .validate()
            .context("Invalid session configuration")?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

/// Durations as integer milliseconds in the config file.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Tests
// ============================================================================
