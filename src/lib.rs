mod availability;
mod client;
mod config;
mod device;
mod diff;
mod error;
mod heater;
mod logger;
mod protocol;
mod scheduler;
mod topology;
mod types;

pub use availability::{AvailabilityState, AvailabilityTracker, Health, Transition};
pub use client::{DeviceClient, GatewayClient, GatewayClientBuilder};
pub use config::*;
pub use device::DeviceHandle;
pub use error::{Error, Result};
pub use heater::{
    plan_transition, HeaterAttributes, HeaterController, PresetCommand, ANTI_FREEZE_MAX,
    ANTI_FREEZE_MIN, DEFAULT_MAX_TEMPERATURE, DEFAULT_MIN_TEMPERATURE, MAX_BOOST_MINUTES,
    MAX_HOLIDAY_DAYS,
};
pub use logger::MessageLogMode;
pub use scheduler::{PollingScheduler, PollingSchedulerBuilder};
pub use topology::{module_keys, ZoneTopology, IDENTIFY_ATTEMPTS};
pub use types::*;
