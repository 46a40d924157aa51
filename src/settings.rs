//! User preferences: alert toggle and overheat threshold
//!
//! The store persists two entries, `notification_enabled` and
//! `overheat_threshold`, in a small TOML file. Every edit is validated,
//! written back to disk and broadcast to subscribers over a watch channel, so
//! the monitor and the alerter always read the current value rather than a
//! cached copy. Edits made by another process are picked up through a
//! [`SettingsWatcher`] on the file's directory.

use crate::error::{MoushoError, Result};
use ::notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};

/// Default overheat threshold (°C)
pub const DEFAULT_OVERHEAT_THRESHOLD: f32 = 40.0;

/// Thresholds the user may choose from (°C)
pub const THRESHOLD_RANGE: RangeInclusive<f32> = 30.0..=50.0;

/// Persisted user preferences
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Show a desktop alert on each overheat transition
    #[serde(default = "default_true")]
    pub notification_enabled: bool,
    /// Readings strictly above this temperature (°C) are overheated
    #[serde(default = "default_threshold")]
    pub overheat_threshold: f32,
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f32 {
    DEFAULT_OVERHEAT_THRESHOLD
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            notification_enabled: true,
            overheat_threshold: DEFAULT_OVERHEAT_THRESHOLD,
        }
    }
}

impl Settings {
    /// Reject thresholds outside [`THRESHOLD_RANGE`]
    pub fn validate_threshold(threshold: f32) -> Result<f32> {
        if !threshold.is_finite() || !THRESHOLD_RANGE.contains(&threshold) {
            return Err(MoushoError::InvalidValue(format!(
                "overheat threshold {} is outside {:.1}..={:.1}°C",
                threshold,
                THRESHOLD_RANGE.start(),
                THRESHOLD_RANGE.end()
            )));
        }
        Ok(threshold)
    }
}

/// File-backed settings with change streaming
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    /// Open the store at `path`, reading the current values (defaults when absent)
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = read_settings(&path)?;
        let (tx, _) = watch::channel(settings);
        debug!("settings loaded from {}: {:?}", path.display(), settings);
        Ok(Self { path, tx })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current values
    pub fn current(&self) -> Settings {
        *self.tx.borrow()
    }

    /// Receive every future change; the receiver starts at the current values
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Change the overheat threshold and persist it
    pub fn set_threshold(&self, threshold: f32) -> Result<()> {
        let threshold = Settings::validate_threshold(threshold)?;
        self.update(|s| s.overheat_threshold = threshold)?;
        info!("overheat threshold set to {:.1}°C", threshold);
        Ok(())
    }

    /// Turn overheat alerts on or off and persist the choice
    pub fn set_notification_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|s| s.notification_enabled = enabled)?;
        info!(
            "overheat notifications {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Re-read the file and publish its values if they differ
    ///
    /// Returns `true` when new values were published.
    pub fn reload(&self) -> Result<bool> {
        let settings = read_settings(&self.path)?;
        let changed = self.tx.send_if_modified(|current| {
            if *current == settings {
                return false;
            }
            *current = settings;
            true
        });
        if changed {
            info!("settings reloaded from {}: {:?}", self.path.display(), settings);
        }
        Ok(changed)
    }

    /// Start watching the settings file for edits from other processes
    ///
    /// Feed every [`SettingsWatcher::changed`] into [`SettingsStore::reload`].
    pub fn watch_file(&self) -> Result<SettingsWatcher> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| {
                MoushoError::InvalidValue(format!(
                    "settings path {} has no file name",
                    self.path.display()
                ))
            })?;
        std::fs::create_dir_all(&dir)?;

        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = ::notify::recommended_watcher(
            move |res: ::notify::Result<Event>| match res {
                Ok(event) => {
                    let touches_settings = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if touches_settings && !matches!(event.kind, EventKind::Access(_)) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => warn!("settings watch error: {:?}", e),
            },
        )?;
        // The directory, not the file: atomic saves replace the inode
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        debug!("watching {} for settings changes", dir.display());

        Ok(SettingsWatcher {
            _watcher: watcher,
            events,
        })
    }

    fn update(&self, edit: impl FnOnce(&mut Settings)) -> Result<()> {
        let mut next = self.current();
        edit(&mut next);
        write_settings(&self.path, &next)?;
        self.tx.send_replace(next);
        Ok(())
    }
}

/// Filesystem notifications for the settings file
pub struct SettingsWatcher {
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<()>,
}

impl SettingsWatcher {
    /// Wait until the settings file changes
    ///
    /// A burst of notifications (truncate, write, rename) resolves once.
    pub async fn changed(&mut self) -> Option<()> {
        let first = self.events.recv().await;
        while self.events.try_recv().is_ok() {}
        first
    }
}

fn read_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(path)?;
    let settings: Settings = toml::from_str(&contents)
        .map_err(|e| MoushoError::ConfigError(format!("Failed to parse settings: {}", e)))?;
    Settings::validate_threshold(settings.overheat_threshold)?;
    Ok(settings)
}

fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = toml::to_string_pretty(settings)
        .map_err(|e| MoushoError::Other(format!("Failed to serialize settings: {}", e)))?;
    // Readers never see a half-written file
    let staging = path.with_extension("toml.tmp");
    std::fs::write(&staging, contents)?;
    std::fs::rename(&staging, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.toml")).unwrap();
        let settings = store.current();
        assert!(settings.notification_enabled);
        assert_eq!(settings.overheat_threshold, 40.0);
    }

    #[test]
    fn test_edits_persist_and_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        let store = SettingsStore::open(&path).unwrap();
        let rx = store.subscribe();

        store.set_threshold(45.5).unwrap();
        store.set_notification_enabled(false).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow().overheat_threshold, 45.5);
        assert!(!rx.borrow().notification_enabled);

        let reopened = SettingsStore::open(&path).unwrap();
        assert_eq!(reopened.current(), store.current());
    }

    #[test]
    fn test_threshold_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        let store = SettingsStore::open(&path).unwrap();

        assert!(store.set_threshold(30.0).is_ok());
        assert!(store.set_threshold(50.0).is_ok());
        assert!(matches!(
            store.set_threshold(29.9),
            Err(MoushoError::InvalidValue(_))
        ));
        assert!(store.set_threshold(f32::NAN).is_err());
        assert_eq!(store.current().overheat_threshold, 50.0);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "overheat_threshold = 42.0\n").unwrap();

        let store = SettingsStore::open(&path).unwrap();
        assert!(store.current().notification_enabled);
        assert_eq!(store.current().overheat_threshold, 42.0);
    }

    #[test]
    fn test_out_of_range_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "overheat_threshold = 80.0\n").unwrap();
        assert!(SettingsStore::open(&path).is_err());
    }

    #[test]
    fn test_reload_picks_up_external_edit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        let store = SettingsStore::open(&path).unwrap();
        store.set_threshold(45.0).unwrap();
        assert!(!store.reload().unwrap());

        // Content decides, not timestamps
        std::fs::write(&path, "overheat_threshold = 32.0\nnotification_enabled = false\n").unwrap();
        assert!(store.reload().unwrap());
        assert_eq!(store.current().overheat_threshold, 32.0);
        assert!(!store.current().notification_enabled);
    }

    #[tokio::test]
    async fn test_watcher_publishes_external_edit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        let store = Arc::new(SettingsStore::open(&path).unwrap());
        store.set_threshold(45.0).unwrap();

        let mut watcher = store.watch_file().unwrap();
        let mut rx = store.subscribe();
        let reloader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                while watcher.changed().await.is_some() {
                    let _ = store.reload();
                }
            })
        };

        std::fs::write(&path, "overheat_threshold = 32.0\nnotification_enabled = false\n").unwrap();

        let settings = *tokio::time::timeout(
            Duration::from_secs(10),
            rx.wait_for(|s| s.overheat_threshold == 32.0),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!settings.notification_enabled);
        reloader.abort();
    }
}
