use std::sync::Arc;

use tokio::sync::watch;

use crate::availability::AvailabilityState;
use crate::types::*;

pub(crate) type SnapshotSender = Arc<watch::Sender<Option<Arc<ModuleSnapshot>>>>;

/// Read side of one polled module.
///
/// Snapshots are swapped whole, so a reader holding an `Arc<ModuleSnapshot>`
/// never sees a partially updated value.
#[derive(Clone)]
pub struct DeviceHandle {
    key: DeviceKey,
    identifier: DeviceIdentifier,
    snapshot: SnapshotSender,
    availability: watch::Receiver<AvailabilityState>,
}

impl DeviceHandle {
    pub(crate) fn new(
        key: DeviceKey,
        identifier: DeviceIdentifier,
        snapshot: SnapshotSender,
        availability: watch::Receiver<AvailabilityState>,
    ) -> Self {
        Self {
            key,
            identifier,
            snapshot,
            availability,
        }
    }

    /// A handle that no polling task feeds. Its availability never changes.
    pub fn detached(
        key: DeviceKey,
        identifier: DeviceIdentifier,
        snapshot: Option<ModuleSnapshot>,
        availability: AvailabilityState,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(snapshot.map(Arc::new));
        let (_availability_tx, availability_rx) = watch::channel(availability);
        Self::new(key, identifier, Arc::new(snapshot_tx), availability_rx)
    }

    pub fn key(&self) -> DeviceKey {
        self.key
    }

    pub fn identifier(&self) -> &DeviceIdentifier {
        &self.identifier
    }

    pub fn snapshot(&self) -> Option<Arc<ModuleSnapshot>> {
        self.snapshot.borrow().clone()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<Option<Arc<ModuleSnapshot>>> {
        self.snapshot.subscribe()
    }

    pub fn availability(&self) -> AvailabilityState {
        *self.availability.borrow()
    }

    pub fn watch_availability(&self) -> watch::Receiver<AvailabilityState> {
        self.availability.clone()
    }

    pub fn is_available(&self) -> bool {
        self.availability().available
    }

    /// Apply a best-effort local projection on top of the current snapshot.
    /// The next successful poll replaces it.
    pub(crate) fn project(&self, f: impl FnOnce(&mut ModuleSnapshot)) {
        self.snapshot.send_modify(|current| {
            if let Some(snapshot) = current {
                let mut next = (**snapshot).clone();
                f(&mut next);
                *current = Some(Arc::new(next));
            }
        });
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("key", &self.key)
            .field("identifier", &self.identifier)
            .field("available", &self.is_available())
            .finish()
    }
}
