use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Temperature stored as Celsius.
/// The gateway works in 0.5 degree increments.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature(f64);

impl Temperature {
    pub fn from_celsius(c: f64) -> Self {
        Self(c)
    }

    pub fn celsius(&self) -> f64 {
        self.0
    }

    /// Round to gateway precision (0.5 increments).
    pub fn to_gateway_celsius(&self) -> f64 {
        (self.0 * 2.0).round() / 2.0
    }

    /// Clamp into `[min, max]`. NaN collapses to `min`.
    pub fn clamp(self, min: Temperature, max: Temperature) -> Self {
        if self.0.is_nan() {
            return min;
        }
        Self(self.0.max(min.0).min(max.0))
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}\u{00b0}C", self.0)
    }
}

/// 1-indexed zone number, stable for the lifetime of a gateway installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ZoneId(u8);

impl ZoneId {
    pub fn new(id: u8) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ZoneId {
    type Error = &'static str;

    fn try_from(id: u8) -> std::result::Result<Self, Self::Error> {
        Self::new(id).ok_or("zone numbers start at 1")
    }
}

impl From<ZoneId> for u8 {
    fn from(id: ZoneId) -> u8 {
        id.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 1-indexed module number within a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ModuleId(u8);

impl ModuleId {
    pub fn new(id: u8) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ModuleId {
    type Error = &'static str;

    fn try_from(id: u8) -> std::result::Result<Self, Self::Error> {
        Self::new(id).ok_or("module numbers start at 1")
    }
}

impl From<ModuleId> for u8 {
    fn from(id: ModuleId) -> u8 {
        id.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle for one physical heater module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub zone: ZoneId,
    pub module: ModuleId,
}

impl DeviceKey {
    pub fn new(zone: ZoneId, module: ModuleId) -> Self {
        Self { zone, module }
    }

    /// Build from raw numbers; `None` if either is zero.
    pub fn from_raw(zone: u8, module: u8) -> Option<Self> {
        Some(Self::new(ZoneId::new(zone)?, ModuleId::new(module)?))
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone={} module={}", self.zone, self.module)
    }
}

/// Identity string reported by a module. Display/registry use only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentifier(String);

impl DeviceIdentifier {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The gateway answers with an all-zero identity while a module's
    /// identity frame is not available.
    pub fn is_sentinel(&self) -> bool {
        self.0.trim().chars().all(|c| c == '0')
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zone number to module count. Zones without modules are never present.
pub type Topology = BTreeMap<ZoneId, u8>;

/// A module that answered identification during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModule {
    pub key: DeviceKey,
    pub identifier: DeviceIdentifier,
}

/// State of one module as returned by a single successful poll.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSnapshot {
    pub current_temperature: Temperature,
    pub target_temperature: Temperature,
    pub boost_active: bool,
    pub boost_minutes_left: u32,
    pub temperature_offset: f64,
    pub window_open_detection: bool,
    pub firmware_version: String,
    pub holiday_active: bool,
    /// Only present when extended data is requested.
    pub anti_freeze_temperature: Option<Temperature>,
    pub min_temperature: Option<Temperature>,
    pub max_temperature: Option<Temperature>,
    pub fetched_at: DateTime<Utc>,
}

impl ModuleSnapshot {
    /// Boost wins over holiday, holiday over home.
    pub fn preset_mode(&self) -> PresetMode {
        if self.boost_active {
            PresetMode::Boost
        } else if self.holiday_active {
            PresetMode::Away
        } else {
            PresetMode::Home
        }
    }

    pub fn hvac_action(&self) -> HvacAction {
        if self.current_temperature < self.target_temperature {
            HvacAction::Heating
        } else {
            HvacAction::Idle
        }
    }

    pub fn boost_time_left(&self) -> String {
        if self.boost_active {
            format!("{} min", self.boost_minutes_left)
        } else {
            "0 min".to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresetMode {
    Home,
    Away,
    Boost,
}

impl PresetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresetMode::Home => "home",
            PresetMode::Away => "away",
            PresetMode::Boost => "boost",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "home" => Some(PresetMode::Home),
            "away" => Some(PresetMode::Away),
            "boost" => Some(PresetMode::Boost),
            _ => None,
        }
    }
}

impl fmt::Display for PresetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacAction {
    Heating,
    Idle,
}

/// Metadata about the gateway itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub firmware_version: String,
    pub model: String,
    pub device_name: String,
    pub mac_address: String,
    pub ip_address: String,
}

/// Events emitted by the scheduler when state changes.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TemperatureChanged { key: DeviceKey, temp: Temperature },
    TargetTemperatureChanged { key: DeviceKey, temp: Temperature },
    PresetChanged { key: DeviceKey, from: Option<PresetMode>, to: PresetMode },
    BoostChanged { key: DeviceKey, active: bool, minutes_left: u32 },
    WindowOpenDetectionChanged { key: DeviceKey, enabled: bool },
    AntiFreezeTemperatureChanged { key: DeviceKey, temp: Temperature },
    FirmwareChanged { key: DeviceKey, version: String },

    DeviceUnavailable { key: DeviceKey, failures: u32 },
    DeviceRecovered { key: DeviceKey },

    TopologyChanged { added: Vec<DeviceKey>, removed: Vec<DeviceKey> },
    GatewayUpdated { info: GatewayInfo },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ids_rejected() {
        assert!(ZoneId::new(0).is_none());
        assert!(ModuleId::new(0).is_none());
        assert!(DeviceKey::from_raw(1, 0).is_none());
        assert_eq!(DeviceKey::from_raw(2, 3).unwrap().to_string(), "zone=2 module=3");
    }

    #[test]
    fn zero_ids_rejected_when_deserializing() {
        assert!(serde_json::from_str::<ZoneId>("0").is_err());
        assert!(serde_json::from_str::<DeviceKey>(r#"{"zone": 1, "module": 0}"#).is_err());

        let key: DeviceKey = serde_json::from_str(r#"{"zone": 2, "module": 3}"#).unwrap();
        assert_eq!(key, DeviceKey::from_raw(2, 3).unwrap());
        assert_eq!(serde_json::to_string(&key).unwrap(), r#"{"zone":2,"module":3}"#);
    }

    #[test]
    fn sentinel_identifier() {
        assert!(DeviceIdentifier::new("000000").is_sentinel());
        assert!(DeviceIdentifier::new("").is_sentinel());
        assert!(!DeviceIdentifier::new("00A100").is_sentinel());
    }

    #[test]
    fn clamp_temperature() {
        let min = Temperature::from_celsius(1.0);
        let max = Temperature::from_celsius(35.0);
        assert_eq!(Temperature::from_celsius(50.0).clamp(min, max), max);
        assert_eq!(Temperature::from_celsius(-3.0).clamp(min, max), min);
        assert_eq!(Temperature::from_celsius(f64::NAN).clamp(min, max), min);
        assert_eq!(Temperature::from_celsius(21.5).clamp(min, max).celsius(), 21.5);
    }

    #[test]
    fn gateway_rounding() {
        assert_eq!(Temperature::from_celsius(22.3).to_gateway_celsius(), 22.5);
        assert_eq!(Temperature::from_celsius(22.1).to_gateway_celsius(), 22.0);
    }

    fn snapshot(boost: bool, holiday: bool) -> ModuleSnapshot {
        ModuleSnapshot {
            current_temperature: Temperature::from_celsius(19.0),
            target_temperature: Temperature::from_celsius(21.0),
            boost_active: boost,
            boost_minutes_left: if boost { 42 } else { 0 },
            temperature_offset: 0.0,
            window_open_detection: false,
            firmware_version: "1.0".to_string(),
            holiday_active: holiday,
            anti_freeze_temperature: None,
            min_temperature: None,
            max_temperature: None,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn preset_precedence() {
        assert_eq!(snapshot(false, false).preset_mode(), PresetMode::Home);
        assert_eq!(snapshot(false, true).preset_mode(), PresetMode::Away);
        assert_eq!(snapshot(true, false).preset_mode(), PresetMode::Boost);
        assert_eq!(snapshot(true, true).preset_mode(), PresetMode::Boost);
    }

    #[test]
    fn boost_time_left_formatting() {
        assert_eq!(snapshot(true, false).boost_time_left(), "42 min");
        assert_eq!(snapshot(false, false).boost_time_left(), "0 min");
    }

    #[test]
    fn hvac_action_from_temperatures() {
        let mut s = snapshot(false, false);
        assert_eq!(s.hvac_action(), HvacAction::Heating);
        s.current_temperature = Temperature::from_celsius(21.0);
        assert_eq!(s.hvac_action(), HvacAction::Idle);
    }
}
