use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde_json::{json, Value};
use tracing::{debug, trace, warn};

use crate::config::{CoordinatorConfig, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::*;
use crate::types::*;
use crate::{Error, Result};

/// The RPC boundary to a gateway.
///
/// Every call may time out or come back malformed. Implementations must
/// tolerate concurrent calls from independent polling tasks and report
/// failure rather than corrupt state under load.
pub trait DeviceClient: Send + Sync {
    /// Zones with their module counts. Zones without modules are omitted.
    fn discover_zones(&self) -> impl Future<Output = Result<Topology>> + Send;

    /// May return the sentinel identifier instead of failing.
    fn resolve_module_identity(
        &self,
        key: DeviceKey,
    ) -> impl Future<Output = Result<DeviceIdentifier>> + Send;

    fn fetch_module_state(
        &self,
        key: DeviceKey,
    ) -> impl Future<Output = Result<ModuleSnapshot>> + Send;

    fn fetch_gateway_info(&self) -> impl Future<Output = Result<GatewayInfo>> + Send;

    fn set_target_temperature(
        &self,
        key: DeviceKey,
        temp: Temperature,
    ) -> impl Future<Output = Result<()>> + Send;

    /// A duration of 0 cancels an active boost.
    fn set_boost(&self, key: DeviceKey, minutes: u32) -> impl Future<Output = Result<()>> + Send;

    fn set_holiday_mode(
        &self,
        key: DeviceKey,
        end: DateTime<Local>,
        resume: Temperature,
    ) -> impl Future<Output = Result<()>> + Send;

    fn clear_holiday_mode(&self, key: DeviceKey) -> impl Future<Output = Result<()>> + Send;

    fn set_window_open_detection(
        &self,
        key: DeviceKey,
        enabled: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    fn set_anti_freeze_temperature(
        &self,
        key: DeviceKey,
        temp: Temperature,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Push the local wall clock to the gateway.
    fn update_date_time(&self, now: DateTime<Local>) -> impl Future<Output = Result<()>> + Send;

    fn ping(&self) -> impl Future<Output = Result<bool>> + Send;
}

pub struct GatewayClientBuilder {
    host: String,
    port: u16,
    protocol: String,
    timeout: Duration,
    extended_data: bool,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl GatewayClientBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            protocol: "http".to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            extended_data: true,
            log_mode: None,
            log_path: None,
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.host.clone())
            .port(config.port)
            .timeout(config.polling.request_timeout)
            .extended_data(config.extended_data)
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn protocol(mut self, proto: &str) -> Self {
        self.protocol = proto.to_string();
        self
    }

    /// Per-request HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn extended_data(mut self, extended: bool) -> Self {
        self.extended_data = extended;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<GatewayClient> {
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            _ => None,
        };

        Ok(GatewayClient {
            http,
            rpc_url: format!("{}://{}:{}{}", self.protocol, self.host, self.port, RPC_PATH),
            extended_data: self.extended_data,
            logger,
        })
    }
}

/// JSON-RPC over HTTP client for a gateway bridge.
pub struct GatewayClient {
    http: reqwest::Client,
    rpc_url: String,
    extended_data: bool,
    logger: Option<Mutex<MessageLogger>>,
}

impl GatewayClient {
    pub fn builder(host: impl Into<String>) -> GatewayClientBuilder {
        GatewayClientBuilder::new(host)
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    fn with_logger(&self, f: impl FnOnce(&mut MessageLogger)) {
        if let Some(logger) = &self.logger {
            match logger.lock() {
                Ok(mut guard) => f(&mut guard),
                Err(poisoned) => f(&mut poisoned.into_inner()),
            }
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let msg = request_message(method, params);
        trace!(method, url = %self.rpc_url, "rpc request");

        let outcome = self.send(&msg).await;
        if let Err(ref e) = outcome {
            debug!(method, error = %e, "rpc failed");
            self.with_logger(|l| l.log_error(method, &e.to_string()));
        }
        outcome
    }

    async fn send(&self, msg: &Value) -> Result<Value> {
        let body = self
            .http
            .post(&self.rpc_url)
            .json(msg)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_reply(&body)
    }

    async fn query(&self, method: &str, params: Value) -> Result<Value> {
        self.with_logger(|l| l.log_request(method, &params));
        self.call(method, params).await
    }

    async fn command(&self, method: &str, key: Option<DeviceKey>, params: Value) -> Result<()> {
        debug!(method, device = ?key, "sending command");
        self.with_logger(|l| l.log_command(method, key, &params));
        self.call(method, params).await?;
        Ok(())
    }
}

impl DeviceClient for GatewayClient {
    async fn discover_zones(&self) -> Result<Topology> {
        let result = self.query(METHOD_GET_ZONES, json!({})).await?;
        parse_zones(result)
    }

    async fn resolve_module_identity(&self, key: DeviceKey) -> Result<DeviceIdentifier> {
        let result = self.query(METHOD_GET_IDENTIFIER, module_params(key)).await?;
        parse_identifier(result)
    }

    async fn fetch_module_state(&self, key: DeviceKey) -> Result<ModuleSnapshot> {
        let result = self
            .call(METHOD_GET_MODULE_DATA, module_data_params(key, self.extended_data))
            .await?;
        self.with_logger(|l| l.log_poll(key, &result));
        parse_module_data(result)
    }

    async fn fetch_gateway_info(&self) -> Result<GatewayInfo> {
        let result = self.query(METHOD_GET_GATEWAY_DATA, json!({})).await?;
        parse_gateway_data(result)
    }

    async fn set_target_temperature(&self, key: DeviceKey, temp: Temperature) -> Result<()> {
        self.command(METHOD_SET_TEMPERATURE, Some(key), set_temperature_params(key, temp))
            .await
    }

    async fn set_boost(&self, key: DeviceKey, minutes: u32) -> Result<()> {
        self.command(METHOD_SET_BOOST, Some(key), set_boost_params(key, minutes))
            .await
    }

    async fn set_holiday_mode(
        &self,
        key: DeviceKey,
        end: DateTime<Local>,
        resume: Temperature,
    ) -> Result<()> {
        self.command(METHOD_SET_HOLIDAY, Some(key), set_holiday_params(key, end, resume))
            .await
    }

    async fn clear_holiday_mode(&self, key: DeviceKey) -> Result<()> {
        self.command(METHOD_DISABLE_HOLIDAY, Some(key), module_params(key))
            .await
    }

    async fn set_window_open_detection(&self, key: DeviceKey, enabled: bool) -> Result<()> {
        self.command(
            METHOD_SET_WINDOW_DETECTION,
            Some(key),
            set_window_detection_params(key, enabled),
        )
        .await
    }

    async fn set_anti_freeze_temperature(&self, key: DeviceKey, temp: Temperature) -> Result<()> {
        self.command(METHOD_SET_ANTI_FREEZE, Some(key), set_anti_freeze_params(key, temp))
            .await
    }

    async fn update_date_time(&self, now: DateTime<Local>) -> Result<()> {
        self.command(METHOD_UPDATE_DATE_TIME, None, update_date_time_params(now))
            .await
    }

    async fn ping(&self) -> Result<bool> {
        match self.query(METHOD_PING, json!({})).await {
            Ok(result) => Ok(parse_pong(&result)),
            Err(Error::Http(e)) if e.is_connect() => {
                warn!(url = %self.rpc_url, "gateway unreachable");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
