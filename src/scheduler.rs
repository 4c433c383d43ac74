//! Polling tasks.
//!
//! Every tracked module gets its own task: wait, fetch under a timeout, feed
//! the module's [`AvailabilityTracker`], publish, re-arm with whatever
//! interval the tracker now asks for. Two shared tasks refresh the zone
//! topology and the gateway metadata on fixed periods. Tasks never wait on
//! each other.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::availability::{AvailabilityState, AvailabilityTracker, Transition};
use crate::client::DeviceClient;
use crate::config::PollingConfig;
use crate::device::{DeviceHandle, SnapshotSender};
use crate::diff::snapshot_events;
use crate::heater::HeaterController;
use crate::topology::{module_keys, ZoneTopology};
use crate::types::*;
use crate::{Error, Result};

const EVENT_CAPACITY: usize = 256;

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(DeviceKey, &ModuleSnapshot) + Send + Sync>;

pub struct PollingSchedulerBuilder<C> {
    client: Arc<C>,
    config: PollingConfig,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
}

impl<C: DeviceClient + 'static> PollingSchedulerBuilder<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            config: PollingConfig::default(),
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
        }
    }

    pub fn config(mut self, config: PollingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(
        mut self,
        f: impl Fn(DeviceKey, &ModuleSnapshot) + Send + Sync + 'static,
    ) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn build(self) -> Result<PollingScheduler<C>> {
        self.config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let shared = Shared {
            client: self.client,
            config: self.config,
            devices: RwLock::new(HashMap::new()),
            topology: watch::channel(Topology::new()).0,
            gateway: watch::channel(None).0,
            gateway_available: watch::channel(false).0,
            events,
            event_callbacks: self.event_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
            shutdown,
        };

        Ok(PollingScheduler {
            shared: Arc::new(shared),
            background: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }
}

struct DeviceSlot {
    handle: DeviceHandle,
    task: JoinHandle<()>,
}

struct Shared<C> {
    client: Arc<C>,
    config: PollingConfig,
    devices: RwLock<HashMap<DeviceKey, DeviceSlot>>,
    topology: watch::Sender<Topology>,
    gateway: watch::Sender<Option<GatewayInfo>>,
    gateway_available: watch::Sender<bool>,
    events: broadcast::Sender<Event>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    shutdown: watch::Sender<bool>,
}

impl<C> Shared<C> {
    fn publish(&self, event: Event) {
        for cb in &self.event_callbacks {
            cb(&event);
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn tracked_keys(&self) -> BTreeSet<DeviceKey> {
        match self.devices.read() {
            Ok(devices) => devices.keys().copied().collect(),
            Err(poisoned) => poisoned.into_inner().keys().copied().collect(),
        }
    }

    fn with_devices<R>(&self, f: impl FnOnce(&mut HashMap<DeviceKey, DeviceSlot>) -> R) -> R {
        match self.devices.write() {
            Ok(mut devices) => f(&mut devices),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

pub struct PollingScheduler<C> {
    shared: Arc<Shared<C>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl<C: DeviceClient + 'static> PollingScheduler<C> {
    pub fn builder(client: Arc<C>) -> PollingSchedulerBuilder<C> {
        PollingSchedulerBuilder::new(client)
    }

    pub fn client(&self) -> &Arc<C> {
        &self.shared.client
    }

    pub fn config(&self) -> &PollingConfig {
        &self.shared.config
    }

    /// Run the initial discovery, then spawn one task per identified module
    /// plus the topology and gateway tasks.
    ///
    /// A failed initial discovery is logged, not returned: the topology task
    /// keeps trying and adds modules as they show up.
    pub async fn start(&self) -> Result<Vec<DiscoveredModule>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Config("scheduler already started".to_string()));
        }

        let topology = ZoneTopology::new(self.shared.client.clone())
            .request_timeout(self.shared.config.request_timeout);
        let modules = match topology.discover_modules().await {
            Ok((zones, modules)) => {
                self.shared.topology.send_replace(zones);
                modules
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch zones on startup");
                Vec::new()
            }
        };

        for module in &modules {
            track(&self.shared, module.clone());
        }

        let mut background = self.background.lock().unwrap_or_else(|p| p.into_inner());
        background.push(tokio::spawn(topology_loop(self.shared.clone())));
        background.push(tokio::spawn(gateway_loop(self.shared.clone())));

        Ok(modules)
    }

    /// Start polling a module outside of discovery. Returns `false` if it
    /// was already tracked.
    pub fn track(&self, module: DiscoveredModule) -> bool {
        track(&self.shared, module)
    }

    /// Stop polling a module and forget its state.
    pub fn untrack(&self, key: DeviceKey) -> bool {
        untrack(&self.shared, key)
    }

    pub fn device(&self, key: DeviceKey) -> Option<DeviceHandle> {
        match self.shared.devices.read() {
            Ok(devices) => devices.get(&key).map(|s| s.handle.clone()),
            Err(poisoned) => poisoned.into_inner().get(&key).map(|s| s.handle.clone()),
        }
    }

    /// All tracked modules, ordered by key.
    pub fn devices(&self) -> Vec<DeviceHandle> {
        self.shared
            .tracked_keys()
            .into_iter()
            .filter_map(|key| self.device(key))
            .collect()
    }

    pub fn controller(&self, key: DeviceKey) -> Result<HeaterController<C>> {
        let handle = self.device(key).ok_or(Error::UnknownDevice(key))?;
        Ok(HeaterController::new(self.shared.client.clone(), handle))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    pub fn topology(&self) -> watch::Receiver<Topology> {
        self.shared.topology.subscribe()
    }

    pub fn gateway_info(&self) -> watch::Receiver<Option<GatewayInfo>> {
        self.shared.gateway.subscribe()
    }

    /// Whether the last gateway metadata refresh succeeded.
    pub fn gateway_available(&self) -> bool {
        *self.shared.gateway_available.borrow()
    }

    /// Stop every task. In-flight fetches are dropped, not awaited.
    pub async fn shutdown(&self) {
        info!("stopping polling");
        self.shared.shutdown.send_replace(true);

        let mut handles: Vec<JoinHandle<()>> = {
            let mut background = self.background.lock().unwrap_or_else(|p| p.into_inner());
            background.drain(..).collect()
        };
        handles.extend(
            self.shared
                .with_devices(|devices| devices.drain().map(|(_, slot)| slot.task).collect::<Vec<_>>()),
        );

        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl<C> Drop for PollingScheduler<C> {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

fn track<C: DeviceClient + 'static>(shared: &Arc<Shared<C>>, module: DiscoveredModule) -> bool {
    shared.with_devices(|devices| {
        // Checked under the lock so a concurrent shutdown drain cannot miss the slot.
        if shared.is_shutting_down() || devices.contains_key(&module.key) {
            return false;
        }
        let tracker = AvailabilityTracker::new(module.key, &shared.config);
        let (availability_tx, availability_rx) = watch::channel(tracker.state());
        let snapshot: SnapshotSender = Arc::new(watch::channel(None).0);
        let handle = DeviceHandle::new(
            module.key,
            module.identifier,
            snapshot.clone(),
            availability_rx,
        );
        debug!(key = %module.key, identifier = %handle.identifier(), "tracking module");
        let task = tokio::spawn(device_loop(shared.clone(), tracker, availability_tx, snapshot));
        devices.insert(module.key, DeviceSlot { handle, task });
        true
    })
}

fn untrack<C>(shared: &Shared<C>, key: DeviceKey) -> bool {
    match shared.with_devices(|devices| devices.remove(&key)) {
        Some(slot) => {
            slot.task.abort();
            debug!(%key, "stopped tracking module");
            true
        }
        None => false,
    }
}

/// Resolves once shutdown has been requested or the scheduler is gone.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop || rx.changed().await.is_err() {
            return;
        }
    }
}

async fn device_loop<C: DeviceClient>(
    shared: Arc<Shared<C>>,
    mut tracker: AvailabilityTracker,
    availability: watch::Sender<AvailabilityState>,
    snapshot: SnapshotSender,
) {
    let key = tracker.key();
    let request_timeout = shared.config.request_timeout;
    let mut shutdown = shared.shutdown.subscribe();
    let mut first = true;

    loop {
        if !first {
            tokio::select! {
                _ = tokio::time::sleep(tracker.interval()) => {}
                _ = stopped(&mut shutdown) => break,
            }
        }
        first = false;

        let fetch = tokio::time::timeout(request_timeout, shared.client.fetch_module_state(key));
        let outcome = tokio::select! {
            r = fetch => r.unwrap_or(Err(Error::TransportTimeout)),
            _ = stopped(&mut shutdown) => break,
        };

        match outcome {
            Ok(current) => {
                let transition = tracker.record_success();
                availability.send_replace(tracker.state());
                if transition == Transition::Recovered {
                    shared.publish(Event::DeviceRecovered { key });
                }

                let current = Arc::new(current);
                let previous = snapshot.send_replace(Some(current.clone()));
                for event in snapshot_events(key, previous.as_deref(), &current) {
                    shared.publish(event);
                }
                for cb in &shared.snapshot_callbacks {
                    cb(key, &current);
                }
                debug!(%key, "updated device data");
            }
            Err(e) => {
                let transition = tracker.record_failure(&e);
                availability.send_replace(tracker.state());
                if transition == Transition::BecameUnavailable {
                    shared.publish(Event::DeviceUnavailable {
                        key,
                        failures: tracker.consecutive_failures(),
                    });
                }
            }
        }
    }

    debug!(%key, "device polling stopped");
}

async fn topology_loop<C: DeviceClient + 'static>(shared: Arc<Shared<C>>) {
    let topology =
        ZoneTopology::new(shared.client.clone()).request_timeout(shared.config.request_timeout);
    let interval = shared.config.zones_interval;
    let mut shutdown = shared.shutdown.subscribe();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stopped(&mut shutdown) => break,
        }

        let discovered = tokio::select! {
            r = topology.discover() => r,
            _ = stopped(&mut shutdown) => break,
        };
        let zones = match discovered {
            Ok(zones) => zones,
            Err(e) => {
                warn!(error = %e, "failed to refresh zones");
                continue;
            }
        };

        let changed = shared.topology.send_if_modified(|current| {
            if *current == zones {
                false
            } else {
                *current = zones.clone();
                true
            }
        });
        if changed {
            info!(zones = ?zones, "zone topology changed");
        }

        let wanted: BTreeSet<DeviceKey> = module_keys(&zones).into_iter().collect();
        let tracked = shared.tracked_keys();
        let missing: Vec<DeviceKey> = wanted.difference(&tracked).copied().collect();
        let gone: Vec<DeviceKey> = tracked.difference(&wanted).copied().collect();
        if missing.is_empty() && gone.is_empty() {
            continue;
        }

        let identified = tokio::select! {
            modules = topology.identify(&missing) => modules,
            _ = stopped(&mut shutdown) => break,
        };

        let mut added = Vec::new();
        for module in identified {
            let key = module.key;
            if track(&shared, module) {
                added.push(key);
            }
        }
        let removed: Vec<DeviceKey> = gone.into_iter().filter(|k| untrack(&shared, *k)).collect();

        if !added.is_empty() || !removed.is_empty() {
            info!(added = added.len(), removed = removed.len(), "device set rebuilt");
            shared.publish(Event::TopologyChanged { added, removed });
        }
    }

    debug!("topology polling stopped");
}

async fn gateway_loop<C: DeviceClient>(shared: Arc<Shared<C>>) {
    let interval = shared.config.device_interval;
    let request_timeout = shared.config.request_timeout;
    let mut shutdown = shared.shutdown.subscribe();
    let mut first = true;

    loop {
        if !first {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stopped(&mut shutdown) => break,
            }
        }
        first = false;

        let fetched = tokio::select! {
            r = tokio::time::timeout(request_timeout, shared.client.fetch_gateway_info()) => {
                r.unwrap_or(Err(Error::TransportTimeout))
            }
            _ = stopped(&mut shutdown) => break,
        };

        match fetched {
            Ok(info) => {
                shared.gateway_available.send_replace(true);
                let changed = shared.gateway.send_if_modified(|current| {
                    if current.as_ref() == Some(&info) {
                        false
                    } else {
                        *current = Some(info.clone());
                        true
                    }
                });
                if changed {
                    debug!(model = %info.model, firmware = %info.firmware_version, "updated gateway data");
                    shared.publish(Event::GatewayUpdated { info });
                }
            }
            Err(e) => {
                shared.gateway_available.send_replace(false);
                warn!(error = %e, "failed to fetch gateway data");
            }
        }
    }

    debug!("gateway polling stopped");
}
