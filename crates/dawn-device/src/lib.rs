//! `dawn-device` — connection management for the alarm's short-range audio device.
//!
//! The radio itself sits behind the [`DeviceCapability`] port; the platform
//! adapter supplies it. [`DeviceConnectionManager`] owns the single connection
//! session, its bounded retry loop and the discovery pass.
//!
//! Nothing in this crate can make an alarm fail: [`DeviceConnectionManager::preconnect`]
//! always completes with a [`PreconnectOutcome`].

pub mod capability;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod retry;
pub mod types;

#[cfg(test)]
mod fake;

pub use capability::DeviceCapability;
pub use error::{DeviceError, Result};
pub use manager::{ConnectionAttempt, DeviceConnectionManager};
pub use retry::RetryPolicy;
pub use types::{
    ConnectionState, DeviceClass, DeviceEvent, DiscoveredDevice, DiscoveryUpdate,
    PreconnectOutcome,
};
