use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::types::*;
use crate::{Error, Result};

pub const RPC_PATH: &str = "/rpc";

pub const METHOD_PING: &str = "ping";
pub const METHOD_GET_ZONES: &str = "get_zones";
pub const METHOD_GET_IDENTIFIER: &str = "get_module_identifier";
pub const METHOD_GET_MODULE_DATA: &str = "get_module_data";
pub const METHOD_GET_GATEWAY_DATA: &str = "get_gateway_data";
pub const METHOD_SET_TEMPERATURE: &str = "set_module_temperature";
pub const METHOD_SET_BOOST: &str = "set_module_boost";
pub const METHOD_SET_HOLIDAY: &str = "set_module_holiday_mode";
pub const METHOD_DISABLE_HOLIDAY: &str = "disable_module_holiday_mode";
pub const METHOD_SET_WINDOW_DETECTION: &str = "set_module_window_open_detection";
pub const METHOD_SET_ANTI_FREEZE: &str = "set_module_anti_freeze_temperature";
pub const METHOD_UPDATE_DATE_TIME: &str = "update_date_time";

/// Holiday end dates travel as local wall-clock minutes.
const HOLIDAY_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M";

pub fn request_message(method: &str, params: Value) -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "method": method,
        "params": params,
    })
}

pub fn module_params(key: DeviceKey) -> Value {
    json!({ "zone": key.zone.get(), "module": key.module.get() })
}

pub fn module_data_params(key: DeviceKey, extended: bool) -> Value {
    json!({ "zone": key.zone.get(), "module": key.module.get(), "extended": extended })
}

pub fn set_temperature_params(key: DeviceKey, temp: Temperature) -> Value {
    json!({
        "zone": key.zone.get(),
        "module": key.module.get(),
        "temperature": temp.to_gateway_celsius(),
    })
}

pub fn set_boost_params(key: DeviceKey, minutes: u32) -> Value {
    json!({ "zone": key.zone.get(), "module": key.module.get(), "minutes": minutes })
}

pub fn set_holiday_params(key: DeviceKey, end: DateTime<Local>, resume: Temperature) -> Value {
    json!({
        "zone": key.zone.get(),
        "module": key.module.get(),
        "end": end.format(HOLIDAY_DATE_FORMAT).to_string(),
        "temperature": resume.to_gateway_celsius(),
    })
}

pub fn set_window_detection_params(key: DeviceKey, enabled: bool) -> Value {
    json!({ "zone": key.zone.get(), "module": key.module.get(), "enabled": enabled })
}

pub fn set_anti_freeze_params(key: DeviceKey, temp: Temperature) -> Value {
    json!({
        "zone": key.zone.get(),
        "module": key.module.get(),
        "temperature": temp.celsius(),
    })
}

pub fn update_date_time_params(now: DateTime<Local>) -> Value {
    json!({ "now": now.format("%Y-%m-%dT%H:%M:%S").to_string() })
}

/// Extract `result` from a reply envelope. An `error` member wins.
pub fn parse_reply(body: &str) -> Result<Value> {
    let parsed: Value = serde_json::from_str(body)?;
    if let Some(err) = parsed.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(Error::Protocol(message));
    }
    match parsed.get("result") {
        Some(v) => Ok(v.clone()),
        None => Err(Error::InvalidResponse("reply has neither result nor error".to_string())),
    }
}

#[derive(Deserialize)]
struct WireZone {
    zone: u8,
    modules: u8,
}

#[derive(Deserialize)]
struct WireZones {
    zones: Vec<WireZone>,
}

pub fn parse_zones(result: Value) -> Result<Topology> {
    let wire: WireZones = serde_json::from_value(result)?;
    let mut topology = Topology::new();
    for z in wire.zones {
        let zone = ZoneId::new(z.zone)
            .ok_or_else(|| Error::InvalidResponse("zone number 0".to_string()))?;
        if z.modules > 0 {
            topology.insert(zone, z.modules);
        }
    }
    Ok(topology)
}

#[derive(Deserialize)]
struct WireIdentifier {
    identifier: Option<String>,
}

/// A missing or null identifier is reported as the sentinel.
pub fn parse_identifier(result: Value) -> Result<DeviceIdentifier> {
    let wire: WireIdentifier = serde_json::from_value(result)?;
    Ok(DeviceIdentifier::new(wire.identifier.unwrap_or_default()))
}

#[derive(Deserialize)]
struct WireModuleData {
    current_temperature: f64,
    target_temperature: f64,
    boost_active: bool,
    #[serde(default)]
    boost_time_left: u32,
    #[serde(default)]
    temperature_offset: f64,
    window_open_detection: bool,
    firmware_version: String,
    holiday_active: bool,
    anti_freeze_temperature: Option<f64>,
    min_temperature: Option<f64>,
    max_temperature: Option<f64>,
}

pub fn parse_module_data(result: Value) -> Result<ModuleSnapshot> {
    let wire: WireModuleData = serde_json::from_value(result)?;
    if !wire.current_temperature.is_finite() || !wire.target_temperature.is_finite() {
        return Err(Error::InvalidResponse("non-finite temperature".to_string()));
    }
    let firmware = wire.firmware_version.trim();
    Ok(ModuleSnapshot {
        current_temperature: Temperature::from_celsius(wire.current_temperature),
        target_temperature: Temperature::from_celsius(wire.target_temperature),
        boost_active: wire.boost_active,
        boost_minutes_left: if wire.boost_active { wire.boost_time_left } else { 0 },
        temperature_offset: wire.temperature_offset,
        window_open_detection: wire.window_open_detection,
        firmware_version: firmware.strip_prefix('v').unwrap_or(firmware).to_string(),
        holiday_active: wire.holiday_active,
        anti_freeze_temperature: wire.anti_freeze_temperature.map(Temperature::from_celsius),
        min_temperature: wire.min_temperature.map(Temperature::from_celsius),
        max_temperature: wire.max_temperature.map(Temperature::from_celsius),
        fetched_at: Utc::now(),
    })
}

pub fn parse_gateway_data(result: Value) -> Result<GatewayInfo> {
    let info: GatewayInfo = serde_json::from_value(result)?;
    Ok(info)
}

pub fn parse_pong(result: &Value) -> bool {
    result.get("pong").and_then(|v| v.as_bool()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key() -> DeviceKey {
        DeviceKey::from_raw(1, 2).unwrap()
    }

    #[test]
    fn request_message_structure() {
        let msg = request_message(METHOD_GET_ZONES, json!({}));
        assert_eq!(msg["method"], "get_zones");
        assert!(msg["params"].is_object());
        assert!(!msg["id"].as_str().unwrap().is_empty());
    }

    #[test]
    fn reply_error_wins() {
        let err = parse_reply(r#"{"id": "x", "error": {"message": "busy"}}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m == "busy"));
    }

    #[test]
    fn reply_without_result_is_invalid() {
        assert!(matches!(parse_reply(r#"{"id": "x"}"#), Err(Error::InvalidResponse(_))));
        assert!(matches!(parse_reply("not json"), Err(Error::InvalidResponse(_))));
    }

    #[test]
    fn zones_skip_empty() {
        let topology = parse_zones(json!({"zones": [
            {"zone": 1, "modules": 2},
            {"zone": 2, "modules": 0},
            {"zone": 3, "modules": 1}
        ]}))
        .unwrap();
        assert_eq!(topology.len(), 2);
        assert_eq!(topology[&ZoneId::new(1).unwrap()], 2);
        assert!(!topology.contains_key(&ZoneId::new(2).unwrap()));
    }

    #[test]
    fn null_identifier_is_sentinel() {
        assert!(parse_identifier(json!({"identifier": null})).unwrap().is_sentinel());
        assert_eq!(parse_identifier(json!({"identifier": "A1B2"})).unwrap().as_str(), "A1B2");
    }

    #[test]
    fn module_data_strips_firmware_prefix() {
        let snap = parse_module_data(json!({
            "current_temperature": 19.5,
            "target_temperature": 21.0,
            "boost_active": false,
            "boost_time_left": 30,
            "window_open_detection": true,
            "firmware_version": "v2.14",
            "holiday_active": true
        }))
        .unwrap();
        assert_eq!(snap.firmware_version, "2.14");
        assert_eq!(snap.boost_minutes_left, 0);
        assert_eq!(snap.preset_mode(), PresetMode::Away);
        assert!(snap.anti_freeze_temperature.is_none());
    }

    #[test]
    fn module_data_missing_field_is_invalid() {
        let err = parse_module_data(json!({"current_temperature": 19.5})).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[test]
    fn holiday_params_format() {
        let end = Local.with_ymd_and_hms(2027, 6, 12, 8, 30, 0).unwrap();
        let params = set_holiday_params(key(), end, Temperature::from_celsius(20.2));
        assert_eq!(params["end"], "2027-06-12T08:30");
        assert_eq!(params["temperature"], 20.0);
        assert_eq!(params["zone"], 1);
        assert_eq!(params["module"], 2);
    }
}
