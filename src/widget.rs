//! Battery temperature widget
//!
//! Renders the latest [`BatterySnapshot`] as a two-line status block and,
//! when enabled, keeps a text file in sync with the monitor so status bars
//! (waybar, polybar, conky, ...) can display it.

use crate::error::Result;
use crate::monitor::BatterySnapshot;
use log::{debug, info};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Headline while the battery is overheated
pub const HEADLINE_OVERHEATED: &str = "Burning out!🔋";

/// Headline while the battery is within the threshold
pub const HEADLINE_COMFY: &str = "Comfy！🔋";

const WAITING: &str = "Waiting for battery data";

/// Text the widget shows for one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetView {
    pub headline: &'static str,
    pub temperature: String,
}

impl WidgetView {
    pub fn from_snapshot(snapshot: &BatterySnapshot) -> Self {
        Self {
            headline: if snapshot.is_overheated {
                HEADLINE_OVERHEATED
            } else {
                HEADLINE_COMFY
            },
            temperature: format!("Temperature: {:.1}°C", snapshot.temperature_c),
        }
    }

    pub fn render(&self) -> String {
        format!("{}\n{}\n", self.headline, self.temperature)
    }
}

/// Render the widget text, or a placeholder before the first reading
pub fn render(snapshot: Option<&BatterySnapshot>) -> String {
    match snapshot {
        Some(snapshot) => WidgetView::from_snapshot(snapshot).render(),
        None => format!("{}\n", WAITING),
    }
}

/// Keeps a widget file current from a snapshot subscription
pub struct WidgetFile {
    path: PathBuf,
    snapshots: watch::Receiver<Option<BatterySnapshot>>,
}

impl WidgetFile {
    pub fn new(path: impl Into<PathBuf>, snapshots: watch::Receiver<Option<BatterySnapshot>>) -> Self {
        Self {
            path: path.into(),
            snapshots,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current state, then rewrite on every change
    ///
    /// Returns once the monitor is dropped.
    pub async fn run(mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("widget file at {}", self.path.display());

        loop {
            let text = render(self.snapshots.borrow_and_update().as_ref());
            std::fs::write(&self.path, text)?;
            debug!("widget file updated");

            if self.snapshots.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power_supply::BatteryExtras;
    use chrono::Utc;

    fn snapshot(tenths: i32, threshold: f32) -> BatterySnapshot {
        BatterySnapshot::from_extras(&BatteryExtras::with_temperature(tenths), threshold, Utc::now())
    }

    #[test]
    fn test_render_comfy() {
        let text = render(Some(&snapshot(385, 40.0)));
        assert_eq!(text, "Comfy！🔋\nTemperature: 38.5°C\n");
    }

    #[test]
    fn test_render_overheated() {
        let view = WidgetView::from_snapshot(&snapshot(412, 40.0));
        assert_eq!(view.headline, HEADLINE_OVERHEATED);
        assert_eq!(view.temperature, "Temperature: 41.2°C");
    }

    #[test]
    fn test_render_without_snapshot() {
        assert_eq!(render(None), "Waiting for battery data\n");
    }

    #[tokio::test]
    async fn test_widget_file_follows_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget").join("battery.txt");
        let (tx, rx) = watch::channel(None);

        let task = tokio::spawn(WidgetFile::new(&path, rx).run());
        tx.send_replace(Some(snapshot(450, 40.0)));
        drop(tx);
        task.await.unwrap().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Burning out!🔋\nTemperature: 45.0°C\n");
    }
}
