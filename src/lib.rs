//! # Mousho
//!
//! Battery overheat monitor. Mousho polls the battery's telemetry, keeps the
//! latest normalized [`BatterySnapshot`], records an [`OverheatEvent`] every
//! time the temperature rises above a user-chosen threshold, and raises a
//! desktop alert for each such transition.
//!
//! ## Features
//!
//! - **Edge-Triggered Alerts**: one event and one alert per crossing, never
//!   one per reading
//! - **Live Settings**: threshold and alert toggle are persisted and streamed
//!   to the monitor; changes apply from the next reading
//! - **Overheat History**: "last 24 hours" and "today" views with bounded
//!   retention and optional persistence
//! - **Status Widget**: text rendering of the current state for status bars
//!
//! ## Quick Start
//!
//! ```no_run
//! use mousho::{BatteryMonitor, MonitorOptions, SettingsStore, SysfsBatterySource, TelemetryListener};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> mousho::Result<()> {
//! let settings = SettingsStore::open("/tmp/mousho/settings.toml")?;
//! let monitor = Arc::new(BatteryMonitor::new(settings.subscribe(), MonitorOptions::default()));
//!
//! let listener = TelemetryListener::new();
//! let registration = listener.register(
//!     SysfsBatterySource::discover()?,
//!     Arc::clone(&monitor),
//!     Duration::from_secs(5),
//! )?;
//!
//! let mut updates = monitor.watch();
//! while updates.changed().await.is_ok() {
//!     if let Some(snapshot) = *updates.borrow() {
//!         println!("{:.1}°C overheated={}", snapshot.temperature_c, snapshot.is_overheated);
//!     }
//! }
//! registration.unregister().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! Battery telemetry is read from the Linux power supply class
//! (`/sys/class/power_supply`). Scripted readings through
//! [`telemetry::ReplaySource`] work everywhere.

pub mod config; // Daemon configuration with TOML persistence
pub mod error;
pub mod event_log; // Overheat history with retention
pub mod monitor; // Snapshot state holder and edge detection
pub mod notify; // Overheat alerts
pub mod power_supply; // Battery telemetry via the power supply class
pub mod settings; // User preferences with change streaming
pub mod telemetry; // Polling listener and battery sources
pub mod widget; // Status widget text

pub use config::{Config, EventsConfig, GeneralConfig, NotifyConfig, WidgetConfig};
pub use error::{MoushoError, Result};
pub use event_log::{EventLog, OverheatEvent, RetentionPolicy};
pub use monitor::{BatteryMonitor, BatterySnapshot, Ingested, MonitorObserver, MonitorOptions, ObserverId};
pub use self::notify::{DesktopNotifier, LogNotifier, Notifier, OverheatAlerter};
pub use power_supply::{BatteryExtras, BatteryHealth, ChargingStatus, PlugType, SysfsBatterySource};
pub use settings::{Settings, SettingsStore, SettingsWatcher};
pub use telemetry::{BatterySource, Registration, ReplaySource, TelemetryListener};
pub use widget::{WidgetFile, WidgetView};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
