//! Battery telemetry fields and the Linux power supply class
//!
//! Battery readings travel through the crate as [`BatteryExtras`]: five raw
//! integers in fixed units (tenths of a degree Celsius, millivolts) plus the
//! platform battery-manager codes for status, health and plug state. This
//! module owns those codes and the enums they decode into, and reads them from
//! `/sys/class/power_supply/` on Linux.
//!
//! # Examples
//!
//! ```no_run
//! use mousho::power_supply::SysfsBatterySource;
//! use mousho::telemetry::BatterySource;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut battery = SysfsBatterySource::discover()?;
//! let extras = battery.read();
//! println!("{}: {:.1}°C", battery.name(), extras.temperature_c());
//! # Ok(())
//! # }
//! ```

use crate::error::{MoushoError, Result};
use crate::telemetry::BatterySource;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default location of the Linux power supply class
pub const DEFAULT_POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";

/// Sentinel for a status, health or plug extra that was not delivered
pub const MISSING_CODE: i32 = -1;

/// Type of power supply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerSupplyType {
    /// AC adapter / mains power
    Mains,
    /// Battery (rechargeable)
    Battery,
    /// USB power delivery, any flavour
    Usb,
    /// Wireless charger
    Wireless,
    /// Unknown type
    Unknown,
}

impl PowerSupplyType {
    /// Parse the contents of a sysfs `type` attribute
    pub fn from_sysfs(value: &str) -> Self {
        let value = value.trim().to_lowercase();
        match value.as_str() {
            "mains" => PowerSupplyType::Mains,
            "battery" => PowerSupplyType::Battery,
            "wireless" => PowerSupplyType::Wireless,
            v if v.starts_with("usb") => PowerSupplyType::Usb,
            _ => PowerSupplyType::Unknown,
        }
    }
}

/// Battery charging status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingStatus {
    /// Battery is charging
    Charging,
    /// Battery is discharging
    Discharging,
    /// Battery is full
    Full,
    /// Not charging (plugged in but not charging)
    NotCharging,
    /// Unknown status
    Unknown,
}

impl ChargingStatus {
    /// Decode a battery-manager status code
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => ChargingStatus::Charging,
            3 => ChargingStatus::Discharging,
            4 => ChargingStatus::NotCharging,
            5 => ChargingStatus::Full,
            _ => ChargingStatus::Unknown,
        }
    }

    /// Battery-manager status code
    pub fn code(self) -> i32 {
        match self {
            ChargingStatus::Unknown => 1,
            ChargingStatus::Charging => 2,
            ChargingStatus::Discharging => 3,
            ChargingStatus::NotCharging => 4,
            ChargingStatus::Full => 5,
        }
    }

    /// Parse the contents of a sysfs `status` attribute
    pub fn from_sysfs(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "charging" => ChargingStatus::Charging,
            "discharging" => ChargingStatus::Discharging,
            "full" => ChargingStatus::Full,
            "not charging" => ChargingStatus::NotCharging,
            _ => ChargingStatus::Unknown,
        }
    }
}

impl std::fmt::Display for ChargingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChargingStatus::Charging => write!(f, "Charging"),
            ChargingStatus::Discharging => write!(f, "Discharging"),
            ChargingStatus::Full => write!(f, "Full"),
            ChargingStatus::NotCharging => write!(f, "Not Charging"),
            ChargingStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Battery health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryHealth {
    /// Battery is in good condition
    Good,
    /// Battery is overheating
    Overheat,
    /// Battery is dead
    Dead,
    /// Over voltage condition
    OverVoltage,
    /// Unspecified failure
    UnspecifiedFailure,
    /// Battery is cold
    Cold,
    /// Unknown health status
    Unknown,
}

impl BatteryHealth {
    /// Decode a battery-manager health code
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => BatteryHealth::Good,
            3 => BatteryHealth::Overheat,
            4 => BatteryHealth::Dead,
            5 => BatteryHealth::OverVoltage,
            6 => BatteryHealth::UnspecifiedFailure,
            7 => BatteryHealth::Cold,
            _ => BatteryHealth::Unknown,
        }
    }

    /// Battery-manager health code
    pub fn code(self) -> i32 {
        match self {
            BatteryHealth::Unknown => 1,
            BatteryHealth::Good => 2,
            BatteryHealth::Overheat => 3,
            BatteryHealth::Dead => 4,
            BatteryHealth::OverVoltage => 5,
            BatteryHealth::UnspecifiedFailure => 6,
            BatteryHealth::Cold => 7,
        }
    }

    /// Parse the contents of a sysfs `health` attribute
    pub fn from_sysfs(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "good" => BatteryHealth::Good,
            "overheat" | "hot" => BatteryHealth::Overheat,
            "dead" => BatteryHealth::Dead,
            "overvoltage" | "over voltage" => BatteryHealth::OverVoltage,
            "unspecified failure" => BatteryHealth::UnspecifiedFailure,
            "cold" => BatteryHealth::Cold,
            _ => BatteryHealth::Unknown,
        }
    }
}

impl std::fmt::Display for BatteryHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatteryHealth::Good => write!(f, "Good"),
            BatteryHealth::Overheat => write!(f, "Overheat"),
            BatteryHealth::Dead => write!(f, "Dead"),
            BatteryHealth::OverVoltage => write!(f, "Over Voltage"),
            BatteryHealth::UnspecifiedFailure => write!(f, "Failure"),
            BatteryHealth::Cold => write!(f, "Cold"),
            BatteryHealth::Unknown => write!(f, "Unknown"),
        }
    }
}

/// What the battery is plugged into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlugType {
    /// AC charger
    Ac,
    /// USB port
    Usb,
    /// Wireless charging pad
    Wireless,
    /// Dock
    Dock,
    /// Running on battery
    None,
}

impl PlugType {
    /// Decode a battery-manager plugged code; 0 and missing both mean unplugged
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => PlugType::Ac,
            2 => PlugType::Usb,
            4 => PlugType::Wireless,
            8 => PlugType::Dock,
            _ => PlugType::None,
        }
    }

    /// Battery-manager plugged code
    pub fn code(self) -> i32 {
        match self {
            PlugType::None => 0,
            PlugType::Ac => 1,
            PlugType::Usb => 2,
            PlugType::Wireless => 4,
            PlugType::Dock => 8,
        }
    }

    pub fn is_plugged_in(self) -> bool {
        self != PlugType::None
    }
}

impl std::fmt::Display for PlugType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlugType::Ac => write!(f, "AC"),
            PlugType::Usb => write!(f, "USB"),
            PlugType::Wireless => write!(f, "Wireless"),
            PlugType::Dock => write!(f, "Dock"),
            PlugType::None => write!(f, "Unplugged"),
        }
    }
}

/// One raw battery reading, in the units the platform delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryExtras {
    /// Temperature in tenths of degrees Celsius
    pub temperature_tenths_c: i32,
    /// Status code
    pub status: i32,
    /// Health code
    pub health: i32,
    /// Plugged code
    pub plugged: i32,
    /// Voltage in millivolts
    pub voltage_mv: i32,
}

impl Default for BatteryExtras {
    fn default() -> Self {
        Self {
            temperature_tenths_c: 0,
            status: MISSING_CODE,
            health: MISSING_CODE,
            plugged: MISSING_CODE,
            voltage_mv: 0,
        }
    }
}

impl BatteryExtras {
    /// Reading with only a temperature, everything else missing
    pub fn with_temperature(temperature_tenths_c: i32) -> Self {
        Self {
            temperature_tenths_c,
            ..Self::default()
        }
    }

    /// Get temperature in Celsius
    pub fn temperature_c(&self) -> f32 {
        self.temperature_tenths_c as f32 / 10.0
    }

    /// Get voltage in volts
    pub fn voltage_v(&self) -> f32 {
        self.voltage_mv as f32 / 1000.0
    }

    pub fn status(&self) -> ChargingStatus {
        ChargingStatus::from_code(self.status)
    }

    pub fn health(&self) -> BatteryHealth {
        BatteryHealth::from_code(self.health)
    }

    pub fn plug_type(&self) -> PlugType {
        PlugType::from_code(self.plugged)
    }
}

/// A battery exposed through the Linux power supply class
#[derive(Debug, Clone)]
pub struct SysfsBatterySource {
    root: PathBuf,
    name: String,
}

impl SysfsBatterySource {
    /// Find the first battery under `/sys/class/power_supply`
    #[cfg(target_os = "linux")]
    pub fn discover() -> Result<Self> {
        Self::discover_in(DEFAULT_POWER_SUPPLY_ROOT)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn discover() -> Result<Self> {
        Err(MoushoError::UnsupportedPlatform(
            "battery telemetry is read from the Linux power supply class".to_string(),
        ))
    }

    /// Find the first battery (by name order) under a power supply root
    pub fn discover_in(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let battery = list_supplies(root)?
            .into_iter()
            .find(|(_, supply_type)| *supply_type == PowerSupplyType::Battery)
            .map(|(name, _)| name)
            .ok_or_else(|| {
                MoushoError::DeviceNotFound(format!("no battery under {}", root.display()))
            })?;

        debug!("discovered battery {} under {}", battery, root.display());
        Ok(Self {
            root: root.to_path_buf(),
            name: battery,
        })
    }

    /// Open a named battery under a power supply root
    pub fn open(root: impl AsRef<Path>, name: &str) -> Result<Self> {
        let root = root.as_ref();
        let path = root.join(name);
        if !path.is_dir() {
            return Err(MoushoError::DeviceNotFound(format!(
                "power supply {} does not exist",
                path.display()
            )));
        }
        let supply_type = read_attr(&path, "type")
            .map(|t| PowerSupplyType::from_sysfs(&t))
            .unwrap_or(PowerSupplyType::Unknown);
        if supply_type != PowerSupplyType::Battery {
            return Err(MoushoError::DeviceNotFound(format!(
                "power supply {} is not a battery ({:?})",
                name, supply_type
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
            name: name.to_string(),
        })
    }

    /// Directory holding this battery's attributes
    pub fn battery_path(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    /// Plugged code derived from the online adapters next to the battery
    fn read_plugged(&self) -> i32 {
        let supplies = match list_supplies(&self.root) {
            Ok(supplies) => supplies,
            Err(_) => return MISSING_CODE,
        };

        let mut saw_adapter = false;
        for (name, supply_type) in supplies {
            let plug = match supply_type {
                PowerSupplyType::Mains => PlugType::Ac,
                PowerSupplyType::Usb => PlugType::Usb,
                PowerSupplyType::Wireless => PlugType::Wireless,
                _ => continue,
            };
            saw_adapter = true;
            let online = read_attr(&self.root.join(&name), "online")
                .map(|v| v == "1")
                .unwrap_or(false);
            if online {
                return plug.code();
            }
        }

        if saw_adapter {
            PlugType::None.code()
        } else {
            MISSING_CODE
        }
    }
}

impl BatterySource for SysfsBatterySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> BatteryExtras {
        let path = self.battery_path();
        let mut extras = BatteryExtras::default();

        // temp is already in tenths of degrees C
        if let Some(temp) = read_attr(&path, "temp").and_then(|v| v.parse::<i32>().ok()) {
            extras.temperature_tenths_c = temp;
        }

        if let Some(status) = read_attr(&path, "status") {
            extras.status = ChargingStatus::from_sysfs(&status).code();
        }

        if let Some(health) = read_attr(&path, "health") {
            extras.health = BatteryHealth::from_sysfs(&health).code();
        }

        // voltage_now is in microvolts
        if let Some(volt_uv) = read_attr(&path, "voltage_now").and_then(|v| v.parse::<i64>().ok())
        {
            extras.voltage_mv = (volt_uv / 1000) as i32;
        }

        extras.plugged = self.read_plugged();
        extras
    }
}

fn read_attr(dir: &Path, attr: &str) -> Option<String> {
    fs::read_to_string(dir.join(attr))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn list_supplies(root: &Path) -> Result<Vec<(String, PowerSupplyType)>> {
    let entries = fs::read_dir(root).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            MoushoError::DeviceNotFound(format!("{} does not exist", root.display()))
        }
        _ => MoushoError::Io(e),
    })?;

    let mut supplies: Vec<(String, PowerSupplyType)> = entries
        .flatten()
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            let supply_type = read_attr(&entry.path(), "type")
                .map(|t| PowerSupplyType::from_sysfs(&t))
                .unwrap_or(PowerSupplyType::Unknown);
            (name, supply_type)
        })
        .collect();
    supplies.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(supplies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_supply(root: &Path, name: &str, attrs: &[(&str, &str)]) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for (attr, value) in attrs {
            fs::write(dir.join(attr), format!("{}\n", value)).unwrap();
        }
    }

    #[test]
    fn test_code_mapping() {
        assert_eq!(ChargingStatus::from_code(2), ChargingStatus::Charging);
        assert_eq!(ChargingStatus::from_code(5), ChargingStatus::Full);
        assert_eq!(ChargingStatus::from_code(MISSING_CODE), ChargingStatus::Unknown);
        assert_eq!(BatteryHealth::from_code(3), BatteryHealth::Overheat);
        assert_eq!(BatteryHealth::from_code(7), BatteryHealth::Cold);
        assert_eq!(BatteryHealth::from_code(MISSING_CODE), BatteryHealth::Unknown);
        assert_eq!(PlugType::from_code(MISSING_CODE), PlugType::None);
        assert!(!PlugType::from_code(0).is_plugged_in());
        assert!(PlugType::from_code(2).is_plugged_in());
    }

    #[test]
    fn test_default_extras_are_sentinels() {
        let extras = BatteryExtras::default();
        assert_eq!(extras.temperature_c(), 0.0);
        assert_eq!(extras.status(), ChargingStatus::Unknown);
        assert_eq!(extras.health(), BatteryHealth::Unknown);
        assert_eq!(extras.plug_type(), PlugType::None);
    }

    #[test]
    fn test_unit_conversion() {
        let extras = BatteryExtras {
            temperature_tenths_c: 412,
            voltage_mv: 4_215,
            ..BatteryExtras::default()
        };
        assert!((extras.temperature_c() - 41.2).abs() < 1e-4);
        assert!((extras.voltage_v() - 4.215).abs() < 1e-4);
    }

    #[test]
    fn test_sysfs_read_full_battery() {
        let root = TempDir::new().unwrap();
        write_supply(
            root.path(),
            "BAT0",
            &[
                ("type", "Battery"),
                ("temp", "385"),
                ("status", "Charging"),
                ("health", "Good"),
                ("voltage_now", "12345000"),
            ],
        );
        write_supply(root.path(), "AC", &[("type", "Mains"), ("online", "1")]);

        let mut source = SysfsBatterySource::discover_in(root.path()).unwrap();
        assert_eq!(source.name(), "BAT0");

        let extras = source.read();
        assert_eq!(extras.temperature_tenths_c, 385);
        assert_eq!(extras.status(), ChargingStatus::Charging);
        assert_eq!(extras.health(), BatteryHealth::Good);
        assert_eq!(extras.voltage_mv, 12_345);
        assert_eq!(extras.plug_type(), PlugType::Ac);
    }

    #[test]
    fn test_sysfs_missing_attributes_degrade_to_defaults() {
        let root = TempDir::new().unwrap();
        write_supply(root.path(), "BAT1", &[("type", "Battery")]);

        let mut source = SysfsBatterySource::discover_in(root.path()).unwrap();
        assert_eq!(source.read(), BatteryExtras::default());
    }

    #[test]
    fn test_sysfs_offline_adapter_means_unplugged() {
        let root = TempDir::new().unwrap();
        write_supply(root.path(), "BAT0", &[("type", "Battery"), ("temp", "300")]);
        write_supply(root.path(), "ucsi-source-psy-USBC000:001", &[("type", "USB"), ("online", "0")]);

        let mut source = SysfsBatterySource::discover_in(root.path()).unwrap();
        assert_eq!(source.read().plugged, 0);
    }

    #[test]
    fn test_discover_without_battery_fails() {
        let root = TempDir::new().unwrap();
        write_supply(root.path(), "AC", &[("type", "Mains"), ("online", "1")]);

        let err = SysfsBatterySource::discover_in(root.path()).unwrap_err();
        assert!(matches!(err, MoushoError::DeviceNotFound(_)));

        let err = SysfsBatterySource::discover_in(root.path().join("missing")).unwrap_err();
        assert!(matches!(err, MoushoError::DeviceNotFound(_)));
    }

    #[test]
    fn test_open_rejects_non_battery() {
        let root = TempDir::new().unwrap();
        write_supply(root.path(), "AC", &[("type", "Mains")]);
        assert!(SysfsBatterySource::open(root.path(), "AC").is_err());
        assert!(SysfsBatterySource::open(root.path(), "BAT9").is_err());
    }
}
