//! Runtime configuration.
//! Defaults match the values the gateway integration has always shipped with.

use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

pub const DEFAULT_PORT: u16 = 6653;
pub const DEFAULT_ZONES_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_DEVICE_INTERVAL: Duration = Duration::from_secs(35);
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(120);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// `min * 2^(failures - threshold)`
    #[default]
    Exponential,
    /// `min * (failures - threshold + 1)`
    Linear,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollingConfig {
    pub zones_interval: Duration,
    /// Base per-device interval, also used for gateway metadata.
    pub device_interval: Duration,
    pub failure_threshold: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_policy: BackoffPolicy,
    pub request_timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            zones_interval: DEFAULT_ZONES_INTERVAL,
            device_interval: DEFAULT_DEVICE_INTERVAL,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff_policy: BackoffPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl PollingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::Config("failure threshold must be at least 1".to_string()));
        }
        if self.min_backoff.is_zero() {
            return Err(Error::Config("minimum backoff must be non-zero".to_string()));
        }
        if self.min_backoff > self.max_backoff {
            return Err(Error::Config(format!(
                "minimum backoff {:?} exceeds maximum {:?}",
                self.min_backoff, self.max_backoff
            )));
        }
        for (name, d) in [
            ("zones interval", self.zones_interval),
            ("device interval", self.device_interval),
            ("request timeout", self.request_timeout),
        ] {
            if d.is_zero() {
                return Err(Error::Config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    /// Request anti-freeze and other extended fields on every poll.
    pub extended_data: bool,
    pub polling: PollingConfig,
}

impl CoordinatorConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            extended_data: true,
            polling: PollingConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let host = match std::env::var("AEROFLOW_HOST") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => return Err(Error::Config("missing AEROFLOW_HOST".to_string())),
        };
        let mut config = Self::new(host);

        if let Some(port) = env_parse::<u16>("AEROFLOW_PORT")? {
            config.port = port;
        }
        if let Ok(v) = std::env::var("AEROFLOW_EXTENDED_DATA") {
            config.extended_data = matches!(v.as_str(), "1" | "true" | "TRUE");
        }

        let p = &mut config.polling;
        if let Some(s) = env_parse("AEROFLOW_ZONES_INTERVAL_SECS")? {
            p.zones_interval = Duration::from_secs(s);
        }
        if let Some(s) = env_parse("AEROFLOW_DEVICE_INTERVAL_SECS")? {
            p.device_interval = Duration::from_secs(s);
        }
        if let Some(n) = env_parse("AEROFLOW_FAILURE_THRESHOLD")? {
            p.failure_threshold = n;
        }
        if let Some(s) = env_parse("AEROFLOW_MIN_BACKOFF_SECS")? {
            p.min_backoff = Duration::from_secs(s);
        }
        if let Some(s) = env_parse("AEROFLOW_MAX_BACKOFF_SECS")? {
            p.max_backoff = Duration::from_secs(s);
        }
        if let Some(s) = env_parse("AEROFLOW_REQUEST_TIMEOUT_SECS")? {
            p.request_timeout = Duration::from_secs(s);
        }
        if let Ok(v) = std::env::var("AEROFLOW_BACKOFF_POLICY") {
            p.backoff_policy = match v.trim() {
                "exponential" => BackoffPolicy::Exponential,
                "linear" => BackoffPolicy::Linear,
                other => {
                    return Err(Error::Config(format!("unknown backoff policy: {other}")));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document. Missing fields fall back to defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let raw: RawConfig =
            serde_json::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        let defaults = PollingConfig::default();
        let secs = |v: Option<u64>, d: Duration| v.map(Duration::from_secs).unwrap_or(d);
        let config = Self {
            host: raw.host,
            port: raw.port.unwrap_or(DEFAULT_PORT),
            extended_data: raw.extended_data.unwrap_or(true),
            polling: PollingConfig {
                zones_interval: secs(raw.zones_interval_secs, defaults.zones_interval),
                device_interval: secs(raw.device_interval_secs, defaults.device_interval),
                failure_threshold: raw.failure_threshold.unwrap_or(defaults.failure_threshold),
                min_backoff: secs(raw.min_backoff_secs, defaults.min_backoff),
                max_backoff: secs(raw.max_backoff_secs, defaults.max_backoff),
                backoff_policy: raw.backoff_policy.unwrap_or_default(),
                request_timeout: secs(raw.request_timeout_secs, defaults.request_timeout),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        self.polling.validate()
    }
}

#[derive(Deserialize)]
struct RawConfig {
    host: String,
    port: Option<u16>,
    extended_data: Option<bool>,
    zones_interval_secs: Option<u64>,
    device_interval_secs: Option<u64>,
    failure_threshold: Option<u32>,
    min_backoff_secs: Option<u64>,
    max_backoff_secs: Option<u64>,
    backoff_policy: Option<BackoffPolicy>,
    request_timeout_secs: Option<u64>,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} is not a valid number: {v}"))),
        _ => Ok(None),
    }
}
