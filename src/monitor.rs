//! Battery state holder and overheat edge detection
//!
//! [`BatteryMonitor`] is the single owner of the current [`BatterySnapshot`]
//! and of the overheat [`EventLog`]. Each raw reading is normalized against
//! the threshold in effect *at that moment*; when the overheated flag flips
//! from false to true an [`OverheatEvent`] is appended and observers are told
//! exactly once. Staying above the threshold does not produce further events.
//!
//! # Examples
//!
//! ```
//! use mousho::monitor::{BatteryMonitor, MonitorOptions};
//! use mousho::power_supply::BatteryExtras;
//! use mousho::settings::Settings;
//! use tokio::sync::watch;
//!
//! let (_settings_tx, settings_rx) = watch::channel(Settings::default());
//! let monitor = BatteryMonitor::new(settings_rx, MonitorOptions::default());
//!
//! let calm = monitor.ingest(BatteryExtras::with_temperature(385));
//! assert!(!calm.snapshot.is_overheated);
//!
//! let hot = monitor.ingest(BatteryExtras::with_temperature(412));
//! assert!(hot.snapshot.is_overheated);
//! assert!(hot.event.is_some());
//! ```

use crate::event_log::{EventLog, OverheatEvent, RetentionPolicy};
use crate::power_supply::{BatteryExtras, BatteryHealth, ChargingStatus, PlugType};
use crate::settings::Settings;
use chrono::{DateTime, Local, TimeZone, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::watch;

/// Normalized, immutable view of the battery at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatterySnapshot {
    /// Temperature in degrees Celsius
    pub temperature_c: f32,
    /// `temperature_c > threshold_c`
    pub is_overheated: bool,
    pub status: ChargingStatus,
    pub health: BatteryHealth,
    pub is_plugged_in: bool,
    pub plug_type: PlugType,
    /// Voltage in volts
    pub voltage_v: f32,
    /// Threshold the snapshot was evaluated against
    pub threshold_c: f32,
    pub captured_at: DateTime<Utc>,
}

impl BatterySnapshot {
    /// Normalize a raw reading against `threshold_c`
    pub fn from_extras(extras: &BatteryExtras, threshold_c: f32, captured_at: DateTime<Utc>) -> Self {
        let temperature_c = extras.temperature_c();
        let plug_type = extras.plug_type();
        Self {
            temperature_c,
            is_overheated: temperature_c > threshold_c,
            status: extras.status(),
            health: extras.health(),
            is_plugged_in: plug_type.is_plugged_in(),
            plug_type,
            voltage_v: extras.voltage_v(),
            threshold_c,
            captured_at,
        }
    }
}

/// Result of one [`BatteryMonitor::ingest`] call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ingested {
    pub snapshot: BatterySnapshot,
    /// Set when this reading crossed into the overheated state
    pub event: Option<OverheatEvent>,
}

/// Receives monitor updates
///
/// All methods default to doing nothing. They are called from the listener
/// task after the monitor's own state has been updated, so an observer may
/// call back into the monitor.
pub trait MonitorObserver: Send + Sync {
    /// Every new snapshot
    fn on_snapshot(&self, _snapshot: &BatterySnapshot) {}

    /// The battery just became overheated
    fn on_overheat(&self, _event: &OverheatEvent, _snapshot: &BatterySnapshot) {}

    /// The battery just dropped back to or below the threshold
    fn on_cooled(&self, _snapshot: &BatterySnapshot) {}
}

/// Handle returned by [`BatteryMonitor::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Monitor construction options
#[derive(Debug, Clone, Default)]
pub struct MonitorOptions {
    /// How much overheat history to keep
    pub retention: RetentionPolicy,
    /// Load the event log from, and save it to, this file
    pub events_path: Option<PathBuf>,
}

struct MonitorState {
    latest: Option<BatterySnapshot>,
    events: EventLog,
}

/// Single source of truth for the current battery state
pub struct BatteryMonitor {
    settings: watch::Receiver<Settings>,
    state: Mutex<MonitorState>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn MonitorObserver>)>>,
    next_observer: AtomicU64,
    snapshots: watch::Sender<Option<BatterySnapshot>>,
    events_path: Option<PathBuf>,
}

impl BatteryMonitor {
    /// Create a monitor reading its threshold from `settings`
    ///
    /// When `options.events_path` points at an unreadable log the monitor
    /// starts with empty history and logs a warning.
    pub fn new(settings: watch::Receiver<Settings>, options: MonitorOptions) -> Self {
        let events = match &options.events_path {
            Some(path) => EventLog::load(path, options.retention).unwrap_or_else(|e| {
                warn!("ignoring overheat history at {}: {}", path.display(), e);
                EventLog::new(options.retention)
            }),
            None => EventLog::new(options.retention),
        };
        let (snapshots, _) = watch::channel(None);

        Self {
            settings,
            state: Mutex::new(MonitorState {
                latest: None,
                events,
            }),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(0),
            snapshots,
            events_path: options.events_path,
        }
    }

    /// Process a reading taken now
    pub fn ingest(&self, extras: BatteryExtras) -> Ingested {
        self.ingest_at(extras, Utc::now())
    }

    /// Process a reading taken at `now`
    pub fn ingest_at(&self, extras: BatteryExtras, now: DateTime<Utc>) -> Ingested {
        let threshold = self.settings.borrow().overheat_threshold;
        let snapshot = BatterySnapshot::from_extras(&extras, threshold, now);

        let (event, cooled, to_persist) = {
            let mut state = self.lock_state();
            let was_overheated = state.latest.is_some_and(|s| s.is_overheated);
            state.latest = Some(snapshot);

            let mut to_persist = None;
            let event = if snapshot.is_overheated && !was_overheated {
                let event = OverheatEvent::new(now, snapshot.temperature_c);
                state.events.append(event);
                if self.events_path.is_some() {
                    to_persist = Some(state.events.clone());
                }
                Some(event)
            } else {
                None
            };
            (event, was_overheated && !snapshot.is_overheated, to_persist)
        };

        if let Some(events) = to_persist {
            self.persist_events(&events);
        }

        self.snapshots.send_replace(Some(snapshot));

        if let Some(event) = &event {
            info!(
                "battery overheated: {:.1}°C > {:.1}°C",
                snapshot.temperature_c, threshold
            );
            self.notify(|o| o.on_overheat(event, &snapshot));
        } else if cooled {
            info!(
                "battery cooled down: {:.1}°C <= {:.1}°C",
                snapshot.temperature_c, threshold
            );
            self.notify(|o| o.on_cooled(&snapshot));
        }
        self.notify(|o| o.on_snapshot(&snapshot));

        Ingested { snapshot, event }
    }

    /// Add an observer; every registered observer receives every update
    pub fn subscribe(&self, observer: Arc<dyn MonitorObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::SeqCst));
        match self.observers.write() {
            Ok(mut observers) => observers.push((id, observer)),
            Err(poisoned) => poisoned.into_inner().push((id, observer)),
        }
        debug!("observer {:?} subscribed", id);
        id
    }

    /// Remove an observer; returns false if it was not registered
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = match self.observers.write() {
            Ok(observers) => observers,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    /// Subscribe to the latest snapshot (`None` until the first reading)
    pub fn watch(&self) -> watch::Receiver<Option<BatterySnapshot>> {
        self.snapshots.subscribe()
    }

    /// Last published snapshot
    pub fn latest(&self) -> Option<BatterySnapshot> {
        self.lock_state().latest
    }

    /// Events with `timestamp > cutoff`, oldest first
    pub fn events_since(&self, cutoff: DateTime<Utc>) -> Vec<OverheatEvent> {
        self.lock_state().events.events_since(cutoff)
    }

    /// Events from the 24 hours before `now`
    pub fn recent_events(&self, now: DateTime<Utc>) -> Vec<OverheatEvent> {
        self.lock_state().events.recent(now)
    }

    /// Events since local midnight
    pub fn today_events(&self, now: DateTime<Utc>) -> Vec<OverheatEvent> {
        self.today_events_in(now, &Local)
    }

    /// Events since midnight in `tz`
    pub fn today_events_in<Tz: TimeZone>(&self, now: DateTime<Utc>, tz: &Tz) -> Vec<OverheatEvent> {
        self.lock_state().events.today(now, tz)
    }

    /// Every retained event, oldest first
    pub fn all_events(&self) -> Vec<OverheatEvent> {
        self.lock_state().events.events().copied().collect()
    }

    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        // A panicking observer never holds this lock, so the state is consistent
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, f: impl Fn(&dyn MonitorObserver)) {
        let observers: Vec<Arc<dyn MonitorObserver>> = match self.observers.read() {
            Ok(observers) => observers.iter().map(|(_, o)| Arc::clone(o)).collect(),
            Err(poisoned) => poisoned.into_inner().iter().map(|(_, o)| Arc::clone(o)).collect(),
        };
        for observer in observers {
            // One misbehaving observer must not take down the listener task
            let result = panic::catch_unwind(AssertUnwindSafe(|| f(observer.as_ref())));
            if let Err(payload) = result {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("monitor observer panicked: {}", message);
            }
        }
    }

    fn persist_events(&self, events: &EventLog) {
        if let Some(path) = &self.events_path {
            if let Err(e) = events.save(path) {
                warn!("failed to save overheat history to {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::AtomicUsize;

    fn monitor_with(threshold: f32) -> (watch::Sender<Settings>, BatteryMonitor) {
        let (tx, rx) = watch::channel(Settings {
            overheat_threshold: threshold,
            ..Settings::default()
        });
        (tx, BatteryMonitor::new(rx, MonitorOptions::default()))
    }

    fn reading(temp_c: f32) -> BatteryExtras {
        BatteryExtras::with_temperature((temp_c * 10.0).round() as i32)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap()
    }

    #[derive(Default)]
    struct Counter {
        snapshots: AtomicUsize,
        overheats: AtomicUsize,
        cooled: AtomicUsize,
    }

    impl MonitorObserver for Counter {
        fn on_snapshot(&self, _snapshot: &BatterySnapshot) {
            self.snapshots.fetch_add(1, Ordering::SeqCst);
        }

        fn on_overheat(&self, _event: &OverheatEvent, _snapshot: &BatterySnapshot) {
            self.overheats.fetch_add(1, Ordering::SeqCst);
        }

        fn on_cooled(&self, _snapshot: &BatterySnapshot) {
            self.cooled.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_scenario_edge_triggered() {
        let (_tx, monitor) = monitor_with(40.0);
        let temps = [38.0, 39.5, 41.2, 42.0, 39.0, 43.5];

        let mut triggered = Vec::new();
        for (i, temp) in temps.iter().enumerate() {
            let now = t0() + Duration::minutes(i as i64);
            if monitor.ingest_at(reading(*temp), now).event.is_some() {
                triggered.push(i + 1);
            }
        }

        assert_eq!(triggered, vec![3, 6]);
        let events = monitor.all_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].temperature_c, 41.2);
        assert_eq!(events[0].timestamp, t0() + Duration::minutes(2));
        assert_eq!(events[1].temperature_c, 43.5);
    }

    #[test]
    fn test_at_or_below_threshold_is_not_overheated() {
        let (_tx, monitor) = monitor_with(40.0);
        for temp in [20.0, 39.9, 40.0] {
            let ingested = monitor.ingest_at(reading(temp), t0());
            assert!(!ingested.snapshot.is_overheated);
            assert!(ingested.event.is_none());
        }
        assert!(monitor.all_events().is_empty());
    }

    #[test]
    fn test_first_reading_above_threshold_is_a_transition() {
        let (_tx, monitor) = monitor_with(40.0);
        assert!(monitor.ingest_at(reading(45.0), t0()).event.is_some());
        assert!(monitor.ingest_at(reading(46.0), t0()).event.is_none());
    }

    #[test]
    fn test_snapshot_fields() {
        let (_tx, monitor) = monitor_with(40.0);
        let extras = BatteryExtras {
            temperature_tenths_c: 367,
            status: 3,
            health: 2,
            plugged: 2,
            voltage_mv: 3_850,
        };
        let snapshot = monitor.ingest_at(extras, t0()).snapshot;

        assert!((snapshot.temperature_c - 36.7).abs() < 1e-4);
        assert_eq!(snapshot.status, ChargingStatus::Discharging);
        assert_eq!(snapshot.health, BatteryHealth::Good);
        assert!(snapshot.is_plugged_in);
        assert_eq!(snapshot.plug_type, PlugType::Usb);
        assert!((snapshot.voltage_v - 3.85).abs() < 1e-4);
        assert_eq!(snapshot.threshold_c, 40.0);
    }

    #[test]
    fn test_missing_extras_degrade_gracefully() {
        let (_tx, monitor) = monitor_with(40.0);
        let snapshot = monitor.ingest_at(BatteryExtras::default(), t0()).snapshot;
        assert_eq!(snapshot.temperature_c, 0.0);
        assert_eq!(snapshot.status, ChargingStatus::Unknown);
        assert_eq!(snapshot.health, BatteryHealth::Unknown);
        assert!(!snapshot.is_plugged_in);
    }

    #[test]
    fn test_threshold_change_is_not_retroactive() {
        let (tx, monitor) = monitor_with(40.0);
        monitor.ingest_at(reading(38.0), t0());

        tx.send_replace(Settings {
            overheat_threshold: 35.0,
            ..Settings::default()
        });
        let latest = monitor.latest().unwrap();
        assert!(!latest.is_overheated);
        assert_eq!(latest.threshold_c, 40.0);

        // Takes effect on the next reading
        let next = monitor.ingest_at(reading(38.0), t0() + Duration::seconds(5));
        assert!(next.snapshot.is_overheated);
        assert!(next.event.is_some());
    }

    #[test]
    fn test_observers_fan_out() {
        let (_tx, monitor) = monitor_with(40.0);
        let first = Arc::new(Counter::default());
        let second = Arc::new(Counter::default());
        monitor.subscribe(first.clone());
        let second_id = monitor.subscribe(second.clone());

        monitor.ingest_at(reading(41.0), t0());
        monitor.ingest_at(reading(42.0), t0());
        assert!(monitor.unsubscribe(second_id));
        assert!(!monitor.unsubscribe(second_id));
        monitor.ingest_at(reading(39.0), t0());

        assert_eq!(first.snapshots.load(Ordering::SeqCst), 3);
        assert_eq!(first.overheats.load(Ordering::SeqCst), 1);
        assert_eq!(first.cooled.load(Ordering::SeqCst), 1);
        assert_eq!(second.snapshots.load(Ordering::SeqCst), 2);
        assert_eq!(second.overheats.load(Ordering::SeqCst), 1);
        assert_eq!(second.cooled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_watch_sees_latest_snapshot() {
        let (_tx, monitor) = monitor_with(40.0);
        let rx = monitor.watch();
        assert!(rx.borrow().is_none());

        monitor.ingest_at(reading(38.0), t0());
        monitor.ingest_at(reading(41.0), t0());
        let latest = rx.borrow().unwrap();
        assert_eq!(latest.temperature_c, 41.0);
        assert!(latest.is_overheated);
    }

    #[test]
    fn test_event_views() {
        let (_tx, monitor) = monitor_with(40.0);
        let now = t0();
        monitor.ingest_at(reading(41.0), now - Duration::hours(20));
        monitor.ingest_at(reading(30.0), now - Duration::hours(19));
        monitor.ingest_at(reading(42.0), now - Duration::hours(1));

        assert_eq!(monitor.recent_events(now).len(), 2);
        assert_eq!(monitor.today_events_in(now, &Utc).len(), 1);
        assert_eq!(monitor.events_since(now - Duration::hours(20)).len(), 1);
    }

    #[test]
    fn test_events_persist_across_monitors() {
        let dir = tempfile::tempdir().unwrap();
        let options = MonitorOptions {
            events_path: Some(dir.path().join("events.json")),
            ..MonitorOptions::default()
        };

        let (_tx, rx) = watch::channel(Settings::default());
        let monitor = BatteryMonitor::new(rx.clone(), options.clone());
        monitor.ingest_at(reading(45.0), t0());
        drop(monitor);

        let restored = BatteryMonitor::new(rx, options);
        let events = restored.all_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].temperature_c, 45.0);
    }

    struct Panicking;

    impl MonitorObserver for Panicking {
        fn on_overheat(&self, _event: &OverheatEvent, _snapshot: &BatterySnapshot) {
            panic!("observer failure");
        }
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        let (_tx, monitor) = monitor_with(40.0);
        let counter = Arc::new(Counter::default());
        monitor.subscribe(Arc::new(Panicking));
        monitor.subscribe(counter.clone());

        for (i, temp) in [38.0, 41.0, 39.0, 42.0].iter().enumerate() {
            monitor.ingest_at(reading(*temp), t0() + Duration::minutes(i as i64));
        }

        assert_eq!(monitor.latest().unwrap().temperature_c, 42.0);
        assert_eq!(monitor.all_events().len(), 2);
        assert_eq!(counter.overheats.load(Ordering::SeqCst), 2);
        assert_eq!(counter.snapshots.load(Ordering::SeqCst), 4);
    }
}
