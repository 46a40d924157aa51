//! Overheat event history
//!
//! An ordered, append-only record of every transition into the overheated
//! state. Retention is bounded by age and by count; the defaults keep enough
//! history for both the "last 24 hours" and "today" views.

use crate::error::Result;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;

/// Window used by [`EventLog::recent`]
pub const RECENT_WINDOW_HOURS: i64 = 24;

/// Default maximum age of a retained event
pub const DEFAULT_RETENTION_HOURS: i64 = 48;

/// Default maximum number of retained events
pub const DEFAULT_MAX_EVENTS: usize = 1024;

/// A single false→true overheat transition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverheatEvent {
    /// When the transition was observed
    pub timestamp: DateTime<Utc>,
    /// Temperature (°C) of the reading that crossed the threshold
    pub temperature_c: f32,
}

impl OverheatEvent {
    pub fn new(timestamp: DateTime<Utc>, temperature_c: f32) -> Self {
        Self {
            timestamp,
            temperature_c,
        }
    }
}

/// How much history the log keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Events older than this (relative to the newest append) are evicted
    pub max_age: Option<Duration>,
    /// Oldest events are evicted beyond this many entries
    pub max_events: Option<usize>,
}

impl RetentionPolicy {
    /// Keep everything for the life of the log
    pub fn unbounded() -> Self {
        Self {
            max_age: None,
            max_events: None,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Some(Duration::hours(DEFAULT_RETENTION_HOURS)),
            max_events: Some(DEFAULT_MAX_EVENTS),
        }
    }
}

/// Ordered overheat history (oldest first)
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: VecDeque<OverheatEvent>,
    policy: RetentionPolicy,
}

impl EventLog {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            events: VecDeque::new(),
            policy,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Append an event and apply retention. No deduplication is done.
    pub fn append(&mut self, event: OverheatEvent) {
        self.events.push_back(event);
        self.evict(event.timestamp);
    }

    /// Events with `timestamp > cutoff`, in append order
    pub fn events_since(&self, cutoff: DateTime<Utc>) -> Vec<OverheatEvent> {
        self.events
            .iter()
            .filter(|e| e.timestamp > cutoff)
            .copied()
            .collect()
    }

    /// Events from the last 24 hours
    pub fn recent(&self, now: DateTime<Utc>) -> Vec<OverheatEvent> {
        self.events_since(now - Duration::hours(RECENT_WINDOW_HOURS))
    }

    /// Events since the start of the current calendar day in `tz`
    pub fn today<Tz: TimeZone>(&self, now: DateTime<Utc>, tz: &Tz) -> Vec<OverheatEvent> {
        self.events_since(start_of_day(now, tz))
    }

    /// All retained events, oldest first
    pub fn events(&self) -> impl Iterator<Item = &OverheatEvent> {
        self.events.iter()
    }

    pub fn latest(&self) -> Option<&OverheatEvent> {
        self.events.back()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Load a log previously written by [`EventLog::save`]; a missing file is an empty log
    pub fn load(path: &Path, policy: RetentionPolicy) -> Result<Self> {
        let mut log = Self::new(policy);
        if !path.exists() {
            return Ok(log);
        }

        let contents = std::fs::read_to_string(path)?;
        let mut events: Vec<OverheatEvent> = serde_json::from_str(&contents)?;
        events.sort_by_key(|e| e.timestamp);
        log.events = events.into();
        if let Some(newest) = log.latest().map(|e| e.timestamp) {
            log.evict(newest);
        }
        debug!("loaded {} overheat events from {}", log.len(), path.display());
        Ok(log)
    }

    /// Write the retained events as a JSON array
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let events: Vec<&OverheatEvent> = self.events.iter().collect();
        let contents = serde_json::to_string_pretty(&events)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        if let Some(max_age) = self.policy.max_age {
            let cutoff = now - max_age;
            while self.events.front().is_some_and(|e| e.timestamp <= cutoff) {
                self.events.pop_front();
            }
        }
        if let Some(max_events) = self.policy.max_events {
            while self.events.len() > max_events {
                self.events.pop_front();
            }
        }
    }
}

/// Midnight of the calendar day containing `now`, as seen in `tz`
pub fn start_of_day<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let midnight = now.with_timezone(tz).date_naive().and_time(NaiveTime::default());
    // Midnight can fall inside a DST gap (at most an hour long); the day
    // then starts at the first local instant that exists
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(midnight + Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| now - Duration::hours(RECENT_WINDOW_HOURS))
}
