use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::diff::diff_json;
use crate::types::DeviceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    Full,
    /// First poll of each module is logged in full, later polls as changes.
    Diffed,
}

pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_state: HashMap<DeviceKey, Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            mode,
            file,
            previous_state: HashMap::new(),
        })
    }

    pub fn log_request(&mut self, method: &str, params: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "params": params,
        });
        self.write_line(&entry);
    }

    pub fn log_command(&mut self, action: &str, key: Option<DeviceKey>, params: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "action": action,
            "zone": key.map(|k| k.zone.get()),
            "module": key.map(|k| k.module.get()),
            "params": params,
        });
        self.write_line(&entry);
    }

    pub fn log_error(&mut self, method: &str, error: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "err",
            "method": method,
            "error": error,
        });
        self.write_line(&entry);
    }

    pub fn log_poll(&mut self, key: DeviceKey, body: &Value) {
        let mut entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "poll",
            "zone": key.zone.get(),
            "module": key.module.get(),
        });

        match self.mode {
            MessageLogMode::Full => {
                entry["body"] = body.clone();
            }
            MessageLogMode::Diffed => match self.previous_state.get(&key) {
                None => {
                    entry["full"] = json!(true);
                    entry["body"] = body.clone();
                }
                Some(prev) => {
                    let mut changes = Vec::new();
                    diff_json(prev, body, "", &mut changes);
                    let change_entries: Vec<Value> = changes
                        .iter()
                        .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                        .collect();
                    entry["changes"] = Value::Array(change_entries);
                }
            },
        }

        self.write_line(&entry);
        if matches!(self.mode, MessageLogMode::Diffed) {
            self.previous_state.insert(key, body.clone());
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}
