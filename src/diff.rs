use serde_json::Value;

use crate::types::*;

/// Smallest temperature change worth reporting.
const TEMPERATURE_EPSILON: f64 = 0.05;

pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = if path_prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{path_prefix}.{key}")
                };
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => {
                        if curr_val.is_object() {
                            diff_json(&Value::Object(serde_json::Map::new()), curr_val, &path, changes);
                        } else {
                            changes.push((path, Value::Null, curr_val.clone()));
                        }
                    }
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

fn temperature_changed(prev: Temperature, curr: Temperature) -> bool {
    (prev.celsius() - curr.celsius()).abs() >= TEMPERATURE_EPSILON
}

/// Events describing how `current` differs from `previous`.
/// With no previous snapshot every observable field is reported.
pub(crate) fn snapshot_events(
    key: DeviceKey,
    previous: Option<&ModuleSnapshot>,
    current: &ModuleSnapshot,
) -> Vec<Event> {
    let mut events = Vec::new();

    if previous.is_none_or(|p| temperature_changed(p.current_temperature, current.current_temperature)) {
        events.push(Event::TemperatureChanged {
            key,
            temp: current.current_temperature,
        });
    }

    if previous.is_none_or(|p| temperature_changed(p.target_temperature, current.target_temperature)) {
        events.push(Event::TargetTemperatureChanged {
            key,
            temp: current.target_temperature,
        });
    }

    let prev_preset = previous.map(ModuleSnapshot::preset_mode);
    if prev_preset != Some(current.preset_mode()) {
        events.push(Event::PresetChanged {
            key,
            from: prev_preset,
            to: current.preset_mode(),
        });
    }

    if previous.is_some_and(|p| {
        p.boost_active != current.boost_active
            || (current.boost_active && p.boost_minutes_left != current.boost_minutes_left)
    }) {
        events.push(Event::BoostChanged {
            key,
            active: current.boost_active,
            minutes_left: current.boost_minutes_left,
        });
    }

    if previous.is_none_or(|p| p.window_open_detection != current.window_open_detection) {
        events.push(Event::WindowOpenDetectionChanged {
            key,
            enabled: current.window_open_detection,
        });
    }

    if let Some(temp) = current.anti_freeze_temperature {
        let changed = match previous.and_then(|p| p.anti_freeze_temperature) {
            Some(prev) => temperature_changed(prev, temp),
            None => true,
        };
        if changed {
            events.push(Event::AntiFreezeTemperatureChanged { key, temp });
        }
    }

    if previous.is_none_or(|p| p.firmware_version != current.firmware_version) {
        events.push(Event::FirmwareChanged {
            key,
            version: current.firmware_version.clone(),
        });
    }

    events
}
