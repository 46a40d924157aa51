//! Telemetry listener
//!
//! A [`BatterySource`] produces raw [`BatteryExtras`]; the listener polls it on
//! a fixed interval and hands every reading to the [`BatteryMonitor`]. Readings
//! are delivered one at a time from a single task, so the monitor never sees
//! overlapping updates.
//!
//! Registration is scoped: every [`Registration`] is unregistered exactly once,
//! either through [`Registration::unregister`] or when it is dropped.

use crate::error::{MoushoError, Result};
use crate::monitor::BatteryMonitor;
use crate::power_supply::BatteryExtras;
use log::{debug, error, info};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Anything that can report the current battery state
pub trait BatterySource: Send {
    /// Human-readable source name (battery device, file name, ...)
    fn name(&self) -> &str;

    /// Take one reading. Values the source cannot supply are left at their
    /// [`BatteryExtras::default`] sentinels; reading never fails.
    fn read(&mut self) -> BatteryExtras;
}

/// Scripted readings, replayed in order
///
/// Once the script is exhausted the last reading repeats, the way a real
/// battery keeps reporting its last state.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    name: String,
    readings: Vec<BatteryExtras>,
    position: usize,
}

impl ReplaySource {
    pub fn new(name: &str, readings: Vec<BatteryExtras>) -> Self {
        Self {
            name: name.to_string(),
            readings,
            position: 0,
        }
    }

    /// Replay a list of temperatures (°C) with every other extra missing
    pub fn from_temperatures(name: &str, temperatures: &[f32]) -> Self {
        let readings = temperatures
            .iter()
            .map(|t| BatteryExtras::with_temperature((t * 10.0).round() as i32))
            .collect();
        Self::new(name, readings)
    }

    /// Parse a replay script
    ///
    /// One reading per line: `temperature_tenths [status [health [plugged [voltage_mv]]]]`.
    /// Omitted trailing fields keep their defaults. `#` starts a comment.
    pub fn parse(name: &str, script: &str) -> Result<Self> {
        let mut readings = Vec::new();
        for (lineno, line) in script.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let values = line
                .split_whitespace()
                .map(|v| v.parse::<i32>())
                .collect::<std::result::Result<Vec<i32>, _>>()
                .map_err(|e| MoushoError::Parse(format!("line {}: {}", lineno + 1, e)))?;
            if values.len() > 5 {
                return Err(MoushoError::Parse(format!(
                    "line {}: expected at most 5 fields, found {}",
                    lineno + 1,
                    values.len()
                )));
            }

            let mut extras = BatteryExtras::default();
            let fields = [
                &mut extras.temperature_tenths_c,
                &mut extras.status,
                &mut extras.health,
                &mut extras.plugged,
                &mut extras.voltage_mv,
            ];
            for (field, value) in fields.into_iter().zip(values) {
                *field = value;
            }
            readings.push(extras);
        }

        if readings.is_empty() {
            return Err(MoushoError::Parse("replay script has no readings".to_string()));
        }
        Ok(Self::new(name, readings))
    }

    /// Load a replay script from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let script = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "replay".to_string());
        Self::parse(&name, &script)
    }
}

impl BatterySource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> BatteryExtras {
        let Some(last) = self.readings.len().checked_sub(1) else {
            return BatteryExtras::default();
        };
        let reading = self.readings[self.position.min(last)];
        if self.position < last {
            self.position += 1;
        }
        reading
    }
}

/// Polls battery sources and feeds the monitor
#[derive(Debug, Clone, Default)]
pub struct TelemetryListener {
    active: Arc<AtomicUsize>,
}

impl TelemetryListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling `source` every `poll_interval`
    ///
    /// The first reading is taken immediately. Must be called from within a
    /// tokio runtime.
    pub fn register<S>(
        &self,
        mut source: S,
        monitor: Arc<BatteryMonitor>,
        poll_interval: Duration,
    ) -> Result<Registration>
    where
        S: BatterySource + 'static,
    {
        if poll_interval.is_zero() {
            return Err(MoushoError::InvalidValue(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MoushoError::Other(format!("no tokio runtime: {}", e)))?;

        let source_name = source.name().to_string();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let extras = source.read();
                        monitor.ingest(extras);
                    }
                }
            }
        });

        self.active.fetch_add(1, Ordering::SeqCst);
        info!(
            "telemetry listener registered for {} (every {:?})",
            source_name, poll_interval
        );

        Ok(Registration {
            source_name,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
            active: Arc::clone(&self.active),
        })
    }

    /// Number of registrations that have not been unregistered yet
    pub fn active_registrations(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// A live listener registration
#[derive(Debug)]
pub struct Registration {
    source_name: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl Registration {
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Stop polling and wait for the in-flight reading to finish
    pub async fn unregister(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("telemetry listener for {} failed: {}", self.source_name, e);
            }
            self.release();
        }
    }

    /// Resolves only if the polling task ends without being unregistered
    ///
    /// The registration is released at that point. Cancel-safe.
    pub async fn stopped(&mut self) -> Result<()> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        let result = handle.await;
        self.handle = None;
        self.shutdown = None;
        self.release();

        match result {
            Ok(()) => Err(MoushoError::Other(format!(
                "telemetry listener for {} exited",
                self.source_name
            ))),
            Err(e) => Err(MoushoError::Other(format!(
                "telemetry listener for {} failed: {}",
                self.source_name, e
            ))),
        }
    }

    fn release(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        info!("telemetry listener unregistered for {}", self.source_name);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        // Already released by unregister()
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        handle.abort();
        debug!("dropping registration for {}", self.source_name);
        self.release();
    }
}
