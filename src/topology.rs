//! Zone and module discovery.
//!
//! The gateway is known to return empty identity frames now and then, so
//! identification is retried a small, fixed number of times per discovery
//! pass. A module that never identifies is skipped for this pass only; the
//! next topology refresh gets a fresh set of attempts.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::DeviceClient;
use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::types::*;
use crate::{Error, Result};

pub const IDENTIFY_ATTEMPTS: u32 = 4;

/// Every module a topology describes, in zone/module order.
pub fn module_keys(topology: &Topology) -> Vec<DeviceKey> {
    topology
        .iter()
        .flat_map(|(zone, count)| {
            (1..=*count).filter_map(move |m| ModuleId::new(m).map(|m| DeviceKey::new(*zone, m)))
        })
        .collect()
}

pub struct ZoneTopology<C> {
    client: Arc<C>,
    attempts: u32,
    request_timeout: Duration,
}

impl<C: DeviceClient> ZoneTopology<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            attempts: IDENTIFY_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound for every single gateway query made during discovery.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Query the gateway once for zones and their module counts.
    pub async fn discover(&self) -> Result<Topology> {
        let mut topology = timeout(self.request_timeout, self.client.discover_zones())
            .await
            .unwrap_or(Err(Error::TransportTimeout))?;
        topology.retain(|_, count| *count > 0);
        debug!(zones = topology.len(), "discovered zones");
        Ok(topology)
    }

    /// Ask a module for its identity, retrying immediately on the sentinel.
    ///
    /// A transport failure or a timed out query uses up an attempt the same
    /// way the sentinel does.
    pub async fn resolve_identifier(&self, key: DeviceKey) -> Result<DeviceIdentifier> {
        for attempt in 1..=self.attempts {
            let reply = timeout(self.request_timeout, self.client.resolve_module_identity(key))
                .await
                .unwrap_or(Err(Error::TransportTimeout));
            match reply {
                Ok(id) if !id.is_sentinel() => {
                    debug!(%key, attempt, identifier = %id, "module identified");
                    return Ok(id);
                }
                Ok(_) => {
                    debug!(%key, attempt, "module returned empty identity");
                }
                Err(e) => {
                    debug!(%key, attempt, error = %e, "identity query failed");
                }
            }
        }
        Err(Error::IdentificationFailed(key))
    }

    /// Identify the given modules. Failures are logged and skipped so one
    /// silent module never hides its siblings.
    pub async fn identify(&self, keys: &[DeviceKey]) -> Vec<DiscoveredModule> {
        let mut modules = Vec::with_capacity(keys.len());
        for &key in keys {
            match self.resolve_identifier(key).await {
                Ok(identifier) => modules.push(DiscoveredModule { key, identifier }),
                Err(e) => warn!(%key, error = %e, "skipping module"),
            }
        }
        modules
    }

    /// Full discovery pass: zones, then identification of every module.
    pub async fn discover_modules(&self) -> Result<(Topology, Vec<DiscoveredModule>)> {
        let topology = self.discover().await?;
        let modules = self.identify(&module_keys(&topology)).await;
        info!(
            zones = topology.len(),
            modules = modules.len(),
            "topology discovery finished"
        );
        Ok((topology, modules))
    }
}
