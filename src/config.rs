//! Configuration management for Mousho
//!
//! This module provides configuration persistence for the monitoring daemon:
//! how often to poll, which battery to watch, how much overheat history to
//! keep and how to raise alerts. User preferences (threshold, alert toggle)
//! live separately in [`crate::settings`].

use crate::error::{MoushoError, Result};
use crate::event_log::RetentionPolicy;
use crate::power_supply::DEFAULT_POWER_SUPPLY_ROOT;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Mousho configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Polling and battery selection
    #[serde(default)]
    pub general: GeneralConfig,
    /// Overheat history
    #[serde(default)]
    pub events: EventsConfig,
    /// Desktop alerts
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Status widget file
    #[serde(default)]
    pub widget: WidgetConfig,
    /// Directory the configuration was loaded from
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

/// General monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Power supply class directory
    #[serde(default = "default_power_supply_root")]
    pub power_supply_root: PathBuf,
    /// Battery to watch (e.g. "BAT0"); first battery found when unset
    #[serde(default)]
    pub battery: Option<String>,
}

/// Overheat history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Drop events older than this many hours (0 = keep forever)
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
    /// Keep at most this many events (0 = no limit)
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Persist history across restarts
    #[serde(default = "default_true")]
    pub persist: bool,
    /// History file; `events.json` in the config directory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Backend: "desktop" or "log"
    #[serde(default = "default_backend")]
    pub backend: String,
    /// notify-send compatible program
    #[serde(default = "default_command")]
    pub command: String,
    /// Urgency passed to the command: "low", "normal" or "critical"
    #[serde(default = "default_urgency")]
    pub urgency: String,
}

/// Status widget configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WidgetConfig {
    /// Keep a text widget file up to date
    #[serde(default)]
    pub enabled: bool,
    /// Widget file; `widget.txt` in the config directory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// Default value functions
fn default_poll_interval() -> u64 {
    5000 // 5 seconds
}

fn default_power_supply_root() -> PathBuf {
    PathBuf::from(DEFAULT_POWER_SUPPLY_ROOT)
}

fn default_retention_hours() -> u32 {
    48
}

fn default_max_events() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_backend() -> String {
    "desktop".to_string()
}

fn default_command() -> String {
    "notify-send".to_string()
}

fn default_urgency() -> String {
    "critical".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            power_supply_root: default_power_supply_root(),
            battery: None,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            max_events: default_max_events(),
            persist: true,
            path: None,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            command: default_command(),
            urgency: default_urgency(),
        }
    }
}

impl GeneralConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl EventsConfig {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: (self.retention_hours > 0)
                .then(|| chrono::Duration::hours(i64::from(self.retention_hours))),
            max_events: (self.max_events > 0).then_some(self.max_events),
        }
    }
}

impl Config {
    /// Get the default configuration directory
    ///
    /// Returns `~/.config/mousho` on Unix-like systems,
    /// or `%APPDATA%\mousho` on Windows.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = if cfg!(windows) {
            std::env::var("APPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
                .unwrap_or_else(|_| PathBuf::from(".config"))
        };

        Ok(config_dir.join("mousho"))
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_file = Self::default_path()?.join("config.toml");
        if !config_file.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&config_file)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| MoushoError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        config.base_dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.to_path_buf())
            .or_else(|| Some(PathBuf::from(".")));
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_dir = Self::default_path()?;
        std::fs::create_dir_all(&config_dir)?;
        self.save_to(&config_dir.join("config.toml"))
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| MoushoError::Other(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.general.poll_interval_ms == 0 {
            return Err(MoushoError::ConfigError(
                "general.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if !matches!(self.notify.backend.as_str(), "desktop" | "log") {
            return Err(MoushoError::ConfigError(format!(
                "unknown notify.backend: {}",
                self.notify.backend
            )));
        }
        if !matches!(self.notify.urgency.as_str(), "low" | "normal" | "critical") {
            return Err(MoushoError::ConfigError(format!(
                "unknown notify.urgency: {}",
                self.notify.urgency
            )));
        }
        Ok(())
    }

    /// Directory holding the data files: where the configuration was
    /// loaded from, else [`Config::default_path`]
    pub fn base_dir(&self) -> Result<PathBuf> {
        match &self.base_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::default_path(),
        }
    }

    /// Settings file next to the configuration
    pub fn settings_path(&self) -> Result<PathBuf> {
        Ok(self.base_dir()?.join("settings.toml"))
    }

    /// Overheat history file, if history is persisted
    pub fn events_path(&self) -> Result<Option<PathBuf>> {
        if !self.events.persist {
            return Ok(None);
        }
        match &self.events.path {
            Some(path) => Ok(Some(path.clone())),
            None => Ok(Some(self.base_dir()?.join("events.json"))),
        }
    }

    /// Widget file, if the widget is enabled
    pub fn widget_path(&self) -> Result<Option<PathBuf>> {
        if !self.widget.enabled {
            return Ok(None);
        }
        match &self.widget.path {
            Some(path) => Ok(Some(path.clone())),
            None => Ok(Some(self.base_dir()?.join("widget.txt"))),
        }
    }
}
