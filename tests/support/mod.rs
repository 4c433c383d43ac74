#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use aeroflow::{
    DeviceClient, DeviceIdentifier, DeviceKey, Error, GatewayInfo, ModuleSnapshot, Result,
    Temperature, Topology, ZoneId,
};
use chrono::{DateTime, Local, Utc};

pub fn key(zone: u8, module: u8) -> DeviceKey {
    DeviceKey::from_raw(zone, module).unwrap()
}

pub fn snapshot(current: f64, target: f64) -> ModuleSnapshot {
    ModuleSnapshot {
        current_temperature: Temperature::from_celsius(current),
        target_temperature: Temperature::from_celsius(target),
        boost_active: false,
        boost_minutes_left: 0,
        temperature_offset: 0.0,
        window_open_detection: false,
        firmware_version: "2.1".to_string(),
        holiday_active: false,
        anti_freeze_temperature: Some(Temperature::from_celsius(7.0)),
        min_temperature: None,
        max_temperature: None,
        fetched_at: Utc::now(),
    }
}

pub fn boosting(current: f64, target: f64) -> ModuleSnapshot {
    ModuleSnapshot {
        boost_active: true,
        boost_minutes_left: 60,
        ..snapshot(current, target)
    }
}

pub fn on_holiday(current: f64, target: f64) -> ModuleSnapshot {
    ModuleSnapshot {
        holiday_active: true,
        ..snapshot(current, target)
    }
}

pub fn gateway_info() -> GatewayInfo {
    GatewayInfo {
        firmware_version: "1.4.2".to_string(),
        model: "AeroFlow Gateway".to_string(),
        device_name: "living room".to_string(),
        mac_address: "00:11:22:33:44:55".to_string(),
        ip_address: "192.168.1.50".to_string(),
    }
}

#[derive(Debug, Clone)]
pub enum Identity {
    Id(&'static str),
    Sentinel,
    Fail,
    /// Never answers.
    Hang,
}

#[derive(Debug, Clone)]
pub enum Reply {
    State(ModuleSnapshot),
    Fail,
    /// Never answers.
    Hang,
}

/// Scripted in-memory gateway. Scripted replies are consumed first, then the
/// steady reply for that module is repeated.
#[derive(Default)]
pub struct FakeClient {
    calls: Mutex<Vec<String>>,
    zones: Mutex<Option<Topology>>,
    identities: Mutex<HashMap<DeviceKey, VecDeque<Identity>>>,
    states: Mutex<HashMap<DeviceKey, VecDeque<Reply>>>,
    steady: Mutex<HashMap<DeviceKey, Reply>>,
    fetches: Mutex<HashMap<DeviceKey, u32>>,
    identify_counts: Mutex<HashMap<DeviceKey, u32>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl FakeClient {
    pub fn with_zones(zones: &[(u8, u8)]) -> Self {
        let client = Self::default();
        client.set_zones(zones);
        client
    }

    pub fn set_zones(&self, zones: &[(u8, u8)]) {
        let topology = zones
            .iter()
            .map(|(z, count)| (ZoneId::new(*z).unwrap(), *count))
            .collect();
        *self.zones.lock().unwrap() = Some(topology);
    }

    pub fn fail_zones(&self) {
        *self.zones.lock().unwrap() = None;
    }

    pub fn script_identity(&self, key: DeviceKey, replies: Vec<Identity>) {
        self.identities
            .lock()
            .unwrap()
            .insert(key, replies.into());
    }

    pub fn script_states(&self, key: DeviceKey, replies: Vec<Reply>) {
        self.states.lock().unwrap().insert(key, replies.into());
    }

    pub fn set_steady(&self, key: DeviceKey, reply: Reply) {
        self.steady.lock().unwrap().insert(key, reply);
    }

    pub fn fail_command(&self, name: &'static str) {
        self.failing.lock().unwrap().insert(name);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, key: DeviceKey) -> u32 {
        self.fetches.lock().unwrap().get(&key).copied().unwrap_or(0)
    }

    pub fn identify_count(&self, key: DeviceKey) -> u32 {
        self.identify_counts
            .lock()
            .unwrap()
            .get(&key)
            .copied()
            .unwrap_or(0)
    }

    fn command(&self, name: &'static str, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(name) {
            return Err(Error::Protocol(format!("{name} rejected")));
        }
        Ok(())
    }

    fn next_state(&self, key: DeviceKey) -> Reply {
        *self.fetches.lock().unwrap().entry(key).or_default() += 1;
        if let Some(reply) = self
            .states
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|q| q.pop_front())
        {
            return reply;
        }
        self.steady
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Reply::State(snapshot(19.0, 21.0)))
    }
}

impl DeviceClient for FakeClient {
    async fn discover_zones(&self) -> Result<Topology> {
        self.zones
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::TransportTimeout)
    }

    async fn resolve_module_identity(&self, key: DeviceKey) -> Result<DeviceIdentifier> {
        *self.identify_counts.lock().unwrap().entry(key).or_default() += 1;
        let next = self
            .identities
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|q| q.pop_front());
        match next {
            Some(Identity::Id(id)) => Ok(DeviceIdentifier::new(id)),
            Some(Identity::Sentinel) => Ok(DeviceIdentifier::new("0000000000")),
            Some(Identity::Fail) => Err(Error::TransportTimeout),
            Some(Identity::Hang) => std::future::pending().await,
            None => Ok(DeviceIdentifier::new(format!(
                "AF-{}-{}",
                key.zone, key.module
            ))),
        }
    }

    async fn fetch_module_state(&self, key: DeviceKey) -> Result<ModuleSnapshot> {
        let reply = self.next_state(key);
        match reply {
            Reply::State(mut s) => {
                s.fetched_at = Utc::now();
                Ok(s)
            }
            Reply::Fail => Err(Error::InvalidResponse("scripted failure".to_string())),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn fetch_gateway_info(&self) -> Result<GatewayInfo> {
        Ok(gateway_info())
    }

    async fn set_target_temperature(&self, key: DeviceKey, temp: Temperature) -> Result<()> {
        self.command(
            "set_temperature",
            format!("set_temperature {key} {:.1}", temp.celsius()),
        )
    }

    async fn set_boost(&self, key: DeviceKey, minutes: u32) -> Result<()> {
        self.command("set_boost", format!("set_boost {key} {minutes}"))
    }

    async fn set_holiday_mode(
        &self,
        key: DeviceKey,
        _end: DateTime<Local>,
        resume: Temperature,
    ) -> Result<()> {
        self.command(
            "set_holiday",
            format!("set_holiday {key} {:.1}", resume.celsius()),
        )
    }

    async fn clear_holiday_mode(&self, key: DeviceKey) -> Result<()> {
        self.command("clear_holiday", format!("clear_holiday {key}"))
    }

    async fn set_window_open_detection(&self, key: DeviceKey, enabled: bool) -> Result<()> {
        self.command(
            "set_window_open_detection",
            format!("set_window_open_detection {key} {enabled}"),
        )
    }

    async fn set_anti_freeze_temperature(&self, key: DeviceKey, temp: Temperature) -> Result<()> {
        self.command(
            "set_anti_freeze",
            format!("set_anti_freeze {key} {:.1}", temp.celsius()),
        )
    }

    async fn update_date_time(&self, _now: DateTime<Local>) -> Result<()> {
        self.command("update_date_time", "update_date_time".to_string())
    }

    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }
}
