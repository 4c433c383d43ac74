//! Per-device availability bookkeeping.
//!
//! One [`AvailabilityTracker`] exists per polled module and is owned by that
//! module's polling task. Nothing else mutates it; other parts of the system
//! only see the [`AvailabilityState`] copies it publishes.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::{BackoffPolicy, PollingConfig};
use crate::types::DeviceKey;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// Failing, but still below the threshold.
    Degrading,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityState {
    pub consecutive_failures: u32,
    pub health: Health,
    pub available: bool,
    pub interval: Duration,
}

/// What a single poll outcome did to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    BecameUnavailable,
    Recovered,
}

#[derive(Debug, Clone)]
pub struct AvailabilityTracker {
    key: DeviceKey,
    failures: u32,
    health: Health,
    interval: Duration,
    base_interval: Duration,
    threshold: u32,
    min_backoff: Duration,
    max_backoff: Duration,
    policy: BackoffPolicy,
}

impl AvailabilityTracker {
    pub fn new(key: DeviceKey, config: &PollingConfig) -> Self {
        Self {
            key,
            failures: 0,
            health: Health::Healthy,
            interval: config.device_interval,
            base_interval: config.device_interval,
            threshold: config.failure_threshold.max(1),
            min_backoff: config.min_backoff,
            max_backoff: config.max_backoff.max(config.min_backoff),
            policy: config.backoff_policy,
        }
    }

    pub fn key(&self) -> DeviceKey {
        self.key
    }

    pub fn is_available(&self) -> bool {
        self.failures < self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn health(&self) -> Health {
        self.health
    }

    /// Delay until the next poll.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> AvailabilityState {
        AvailabilityState {
            consecutive_failures: self.failures,
            health: self.health,
            available: self.is_available(),
            interval: self.interval,
        }
    }

    pub fn record_success(&mut self) -> Transition {
        let was_unavailable = self.health == Health::Unavailable;
        self.failures = 0;
        self.interval = self.base_interval;
        self.health = Health::Healthy;

        if was_unavailable {
            info!(key = %self.key, "device is available again");
            Transition::Recovered
        } else {
            Transition::None
        }
    }

    pub fn record_failure(&mut self, error: &Error) -> Transition {
        self.failures = self.failures.saturating_add(1);
        let reason = match error {
            Error::TransportTimeout => "timeout fetching device data",
            Error::InvalidResponse(_) => "invalid response from device",
            _ => "error fetching device data",
        };
        warn!(
            key = %self.key,
            error = %error,
            failures = self.failures,
            threshold = self.threshold,
            "{reason}"
        );

        if self.failures < self.threshold {
            self.health = Health::Degrading;
            return Transition::None;
        }

        let was_unavailable = self.health == Health::Unavailable;
        self.health = Health::Unavailable;
        self.interval = self.backoff_interval();
        warn!(
            key = %self.key,
            retry_in = ?self.interval,
            attempt = self.failures,
            "device marked unavailable"
        );

        if was_unavailable {
            Transition::None
        } else {
            Transition::BecameUnavailable
        }
    }

    fn backoff_interval(&self) -> Duration {
        let over = self.failures.saturating_sub(self.threshold);
        let factor = match self.policy {
            // 2^31 seconds is far beyond any sane ceiling.
            BackoffPolicy::Exponential => 1u32 << over.min(31),
            BackoffPolicy::Linear => over.saturating_add(1),
        };
        self.min_backoff
            .saturating_mul(factor)
            .clamp(self.min_backoff, self.max_backoff)
    }
}
