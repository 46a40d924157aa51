//! Overheat alerts
//!
//! A [`Notifier`] knows how to show one thing: the overheat alert. The
//! [`OverheatAlerter`] observer decides *when*: once per transition into the
//! overheated state, and only if the user has notifications enabled at that
//! moment. Alert failures are logged and swallowed; they never reach the
//! monitor and are never retried.

use crate::error::{MoushoError, Result};
use crate::event_log::OverheatEvent;
use crate::monitor::{BatterySnapshot, MonitorObserver};
use crate::settings::Settings;
use log::{debug, info, warn};
use std::io::ErrorKind;
use std::process::Command;
use std::sync::Arc;
use tokio::sync::watch;

/// Alert title
pub const ALERT_TITLE: &str = "Ouch!!🥹🔋";

/// Alert body
pub const ALERT_BODY: &str = "Your battery is overheated! It's burning hot🥵🔥";

/// Shows the overheat alert
pub trait Notifier: Send + Sync {
    fn show_overheat_alert(&self) -> Result<()>;
}

/// Desktop notification through a `notify-send` compatible command
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: String,
    urgency: String,
    app_name: String,
}

impl DesktopNotifier {
    pub fn new(program: &str, urgency: &str) -> Self {
        Self {
            program: program.to_string(),
            urgency: urgency.to_string(),
            app_name: "mousho".to_string(),
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "--app-name".to_string(),
            self.app_name.clone(),
            "--urgency".to_string(),
            self.urgency.clone(),
            "--icon".to_string(),
            "dialog-warning".to_string(),
            ALERT_TITLE.to_string(),
            ALERT_BODY.to_string(),
        ]
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new("notify-send", "critical")
    }
}

impl Notifier for DesktopNotifier {
    fn show_overheat_alert(&self) -> Result<()> {
        let output = Command::new(&self.program)
            .args(self.args())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => MoushoError::PermissionDenied(format!(
                    "not allowed to run {}: {}",
                    self.program, e
                )),
                ErrorKind::NotFound => {
                    MoushoError::CommandFailed(format!("{} not found", self.program))
                }
                _ => MoushoError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MoushoError::CommandFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Writes the alert to the log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_overheat_alert(&self) -> Result<()> {
        warn!("{} {}", ALERT_TITLE, ALERT_BODY);
        Ok(())
    }
}

/// Observer that fires the notifier on every overheat transition
///
/// Inside a tokio runtime the notifier runs on the blocking pool, so a slow
/// notification daemon never stalls telemetry.
#[derive(Clone)]
pub struct OverheatAlerter {
    notifier: Arc<dyn Notifier>,
    settings: watch::Receiver<Settings>,
}

impl OverheatAlerter {
    pub fn new(notifier: Arc<dyn Notifier>, settings: watch::Receiver<Settings>) -> Self {
        Self { notifier, settings }
    }

    /// Show the alert if notifications are enabled right now
    ///
    /// Returns whether the notifier was invoked.
    pub fn alert(&self) -> bool {
        if !self.settings.borrow().notification_enabled {
            debug!("overheat alert suppressed: notifications disabled");
            return false;
        }

        match self.notifier.show_overheat_alert() {
            Ok(()) => info!("overheat alert shown"),
            Err(MoushoError::PermissionDenied(msg)) => {
                warn!("overheat alert not shown, permission denied: {}", msg)
            }
            Err(e) => warn!("overheat alert failed: {}", e),
        }
        true
    }
}

impl MonitorObserver for OverheatAlerter {
    fn on_overheat(&self, _event: &OverheatEvent, _snapshot: &BatterySnapshot) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let alerter = self.clone();
                runtime.spawn_blocking(move || alerter.alert());
            }
            Err(_) => {
                self.alert();
            }
        }
    }
}
