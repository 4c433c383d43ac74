//! Preset modes and commands for a single heater module.
//!
//! The firmware cannot hold Boost and Away at the same time, so every
//! transition cancels the conflicting mode before enabling the requested one.

use std::sync::Arc;

use chrono::{DateTime, Duration, Local};
use tracing::{debug, error};

use crate::availability::AvailabilityState;
use crate::client::DeviceClient;
use crate::device::DeviceHandle;
use crate::types::*;
use crate::{Error, Result};

/// Longest boost the gateway accepts, in minutes.
pub const MAX_BOOST_MINUTES: u32 = 95;
/// Longest holiday the gateway accepts, in days.
pub const MAX_HOLIDAY_DAYS: i64 = 240;

pub const DEFAULT_MIN_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_MAX_TEMPERATURE: f64 = 35.0;
pub const ANTI_FREEZE_MIN: f64 = 0.0;
pub const ANTI_FREEZE_MAX: f64 = 17.0;

/// One device command issued as part of a preset change.
#[derive(Debug, Clone, PartialEq)]
pub enum PresetCommand {
    /// 0 minutes cancels a running boost.
    SetBoost { minutes: u32 },
    EnableHoliday { end: DateTime<Local>, resume: Temperature },
    DisableHoliday,
}

/// Commands that move a module from `current` to `requested`, in the order
/// they must be sent.
pub fn plan_transition(
    current: PresetMode,
    requested: PresetMode,
    now: DateTime<Local>,
    target: Temperature,
) -> Vec<PresetCommand> {
    use PresetCommand::*;
    use PresetMode::*;

    let holiday = EnableHoliday {
        end: now + Duration::days(MAX_HOLIDAY_DAYS),
        resume: target,
    };
    let boost = SetBoost {
        minutes: MAX_BOOST_MINUTES,
    };

    match (current, requested) {
        (Boost, Away) => vec![SetBoost { minutes: 0 }, holiday],
        (_, Away) => vec![holiday],
        (Away, Boost) => vec![DisableHoliday, boost],
        (_, Boost) => vec![boost],
        (Boost, Home) => vec![SetBoost { minutes: 0 }],
        (Away, Home) => vec![DisableHoliday],
        (Home, Home) => vec![],
    }
}

/// Diagnostic attributes exposed next to the climate state.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaterAttributes {
    pub window_open_detection: bool,
    pub anti_freeze_temperature: Option<Temperature>,
    pub boost_time_left: String,
    pub temperature_offset: f64,
    pub zone: ZoneId,
    pub module: ModuleId,
    pub consecutive_failures: u32,
}

pub struct HeaterController<C> {
    client: Arc<C>,
    device: DeviceHandle,
}

impl<C: DeviceClient> HeaterController<C> {
    pub fn new(client: Arc<C>, device: DeviceHandle) -> Self {
        Self { client, device }
    }

    pub fn key(&self) -> DeviceKey {
        self.device.key()
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn name(&self) -> String {
        format!("Thermotec AeroFlow - Heater - {}", self.device.identifier())
    }

    pub fn is_available(&self) -> bool {
        self.device.is_available()
    }

    pub fn availability(&self) -> AvailabilityState {
        self.device.availability()
    }

    pub fn snapshot(&self) -> Option<Arc<ModuleSnapshot>> {
        self.device.snapshot()
    }

    pub fn preset_mode(&self) -> Option<PresetMode> {
        self.snapshot().map(|s| s.preset_mode())
    }

    pub fn hvac_action(&self) -> Option<HvacAction> {
        self.snapshot().map(|s| s.hvac_action())
    }

    pub fn boost_time_left(&self) -> String {
        self.snapshot()
            .map(|s| s.boost_time_left())
            .unwrap_or_else(|| "0 min".to_string())
    }

    /// Target range reported by the module, or the protocol default.
    pub fn temperature_range(&self) -> (Temperature, Temperature) {
        let snapshot = self.snapshot();
        let min = snapshot
            .as_ref()
            .and_then(|s| s.min_temperature)
            .unwrap_or(Temperature::from_celsius(DEFAULT_MIN_TEMPERATURE));
        let max = snapshot
            .as_ref()
            .and_then(|s| s.max_temperature)
            .unwrap_or(Temperature::from_celsius(DEFAULT_MAX_TEMPERATURE));
        if min > max {
            (max, min)
        } else {
            (min, max)
        }
    }

    pub fn attributes(&self) -> Option<HeaterAttributes> {
        let snapshot = self.snapshot()?;
        let key = self.key();
        Some(HeaterAttributes {
            window_open_detection: snapshot.window_open_detection,
            anti_freeze_temperature: snapshot.anti_freeze_temperature,
            boost_time_left: snapshot.boost_time_left(),
            temperature_offset: snapshot.temperature_offset,
            zone: key.zone,
            module: key.module,
            consecutive_failures: self.availability().consecutive_failures,
        })
    }

    /// Set a new target temperature, clamped silently to the module's range.
    /// A missing value is logged and ignored.
    pub async fn set_temperature(&self, celsius: Option<f64>) -> Result<()> {
        let Some(celsius) = celsius else {
            error!(key = %self.key(), "missing target temperature");
            return Ok(());
        };
        let (min, max) = self.temperature_range();
        let target = gateway_target(celsius, min, max);
        debug!(key = %self.key(), requested = celsius, target = %target, "set temperature");

        self.client.set_target_temperature(self.key(), target).await?;
        self.device.project(|s| s.target_temperature = target);
        Ok(())
    }

    pub async fn set_preset_mode(&self, requested: PresetMode) -> Result<()> {
        let snapshot = self.snapshot().ok_or(Error::NoState(self.key()))?;
        let current = snapshot.preset_mode();
        let commands = plan_transition(
            current,
            requested,
            Local::now(),
            snapshot.target_temperature,
        );
        debug!(key = %self.key(), from = %current, to = %requested, steps = commands.len(), "set preset");

        for command in commands {
            self.send(&command).await?;
            self.device.project(|s| apply(s, &command));
        }
        Ok(())
    }

    pub async fn set_window_open_detection(&self, enabled: bool) -> Result<()> {
        debug!(key = %self.key(), enabled, "set window open detection");
        self.client.set_window_open_detection(self.key(), enabled).await?;
        self.device.project(|s| s.window_open_detection = enabled);
        Ok(())
    }

    pub async fn set_anti_freeze_temperature(&self, celsius: f64) -> Result<()> {
        if !(ANTI_FREEZE_MIN..=ANTI_FREEZE_MAX).contains(&celsius) {
            return Err(Error::OutOfRange {
                what: "anti-freeze temperature",
                value: celsius,
                min: ANTI_FREEZE_MIN,
                max: ANTI_FREEZE_MAX,
            });
        }
        let temp = Temperature::from_celsius(celsius);
        debug!(key = %self.key(), temp = %temp, "set anti-freeze temperature");
        self.client.set_anti_freeze_temperature(self.key(), temp).await?;
        self.device.project(|s| s.anti_freeze_temperature = Some(temp));
        Ok(())
    }

    async fn send(&self, command: &PresetCommand) -> Result<()> {
        let key = self.key();
        match command {
            PresetCommand::SetBoost { minutes: 0 } => {
                debug!(%key, "disable boost");
                self.client.set_boost(key, 0).await
            }
            PresetCommand::SetBoost { minutes } => {
                debug!(%key, minutes, "activate boost");
                self.client.set_boost(key, *minutes).await
            }
            PresetCommand::EnableHoliday { end, resume } => {
                debug!(%key, end = %end, resume = %resume, "activate holiday mode");
                self.client.set_holiday_mode(key, *end, *resume).await
            }
            PresetCommand::DisableHoliday => {
                debug!(%key, "disable holiday mode");
                self.client.clear_holiday_mode(key).await
            }
        }
    }
}

/// Clamp to `[min, max]` and snap to the gateway's 0.5 degree grid without
/// leaving the range.
fn gateway_target(celsius: f64, min: Temperature, max: Temperature) -> Temperature {
    let snapped = Temperature::from_celsius(celsius)
        .clamp(min, max)
        .to_gateway_celsius();
    let snapped = if snapped > max.celsius() {
        snapped - 0.5
    } else if snapped < min.celsius() {
        snapped + 0.5
    } else {
        snapped
    };
    Temperature::from_celsius(snapped)
}

fn apply(snapshot: &mut ModuleSnapshot, command: &PresetCommand) {
    match command {
        PresetCommand::SetBoost { minutes } => {
            snapshot.boost_active = *minutes > 0;
            snapshot.boost_minutes_left = *minutes;
        }
        PresetCommand::EnableHoliday { .. } => snapshot.holiday_active = true,
        PresetCommand::DisableHoliday => snapshot.holiday_active = false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use PresetMode::*;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap()
    }

    fn target() -> Temperature {
        Temperature::from_celsius(21.0)
    }

    fn holiday() -> PresetCommand {
        PresetCommand::EnableHoliday {
            end: now() + Duration::days(240),
            resume: target(),
        }
    }

    #[test]
    fn boost_to_away_cancels_boost_first() {
        assert_eq!(
            plan_transition(Boost, Away, now(), target()),
            vec![PresetCommand::SetBoost { minutes: 0 }, holiday()]
        );
    }

    #[test]
    fn away_to_boost_clears_holiday_first() {
        assert_eq!(
            plan_transition(Away, Boost, now(), target()),
            vec![
                PresetCommand::DisableHoliday,
                PresetCommand::SetBoost { minutes: 95 }
            ]
        );
    }

    #[test]
    fn home_transitions() {
        assert_eq!(plan_transition(Home, Away, now(), target()), vec![holiday()]);
        assert_eq!(
            plan_transition(Home, Boost, now(), target()),
            vec![PresetCommand::SetBoost { minutes: 95 }]
        );
        assert!(plan_transition(Home, Home, now(), target()).is_empty());
    }

    #[test]
    fn back_to_home() {
        assert_eq!(
            plan_transition(Boost, Home, now(), target()),
            vec![PresetCommand::SetBoost { minutes: 0 }]
        );
        assert_eq!(
            plan_transition(Away, Home, now(), target()),
            vec![PresetCommand::DisableHoliday]
        );
    }

    #[test]
    fn reissuing_current_mode_refreshes_it() {
        assert_eq!(plan_transition(Away, Away, now(), target()), vec![holiday()]);
        assert_eq!(
            plan_transition(Boost, Boost, now(), target()),
            vec![PresetCommand::SetBoost { minutes: 95 }]
        );
    }

    #[test]
    fn target_stays_on_grid_inside_range() {
        let c = |v: f64| Temperature::from_celsius(v);
        assert_eq!(gateway_target(31.0, c(1.0), c(30.3)), c(30.0));
        assert_eq!(gateway_target(0.0, c(4.8), c(35.0)), c(5.0));
        assert_eq!(gateway_target(21.3, c(1.0), c(35.0)), c(21.5));
        assert_eq!(gateway_target(50.0, c(1.0), c(35.0)), c(35.0));
    }

    #[test]
    fn projection_keeps_modes_exclusive() {
        let mut s = ModuleSnapshot {
            current_temperature: Temperature::from_celsius(18.0),
            target_temperature: target(),
            boost_active: true,
            boost_minutes_left: 40,
            temperature_offset: 0.0,
            window_open_detection: false,
            firmware_version: "1.0".to_string(),
            holiday_active: false,
            anti_freeze_temperature: None,
            min_temperature: None,
            max_temperature: None,
            fetched_at: chrono::Utc::now(),
        };
        for command in plan_transition(Boost, Away, now(), target()) {
            apply(&mut s, &command);
        }
        assert!(!s.boost_active);
        assert!(s.holiday_active);
        assert_eq!(s.preset_mode(), Away);
    }
}
