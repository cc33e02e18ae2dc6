//! `dawn-core` — shared model, clock and configuration for the Dawn alarm engine.
//!
//! Every other crate in the workspace depends on this one for the [`Alarm`]
//! record, the [`TimeSource`] seam and the [`DawnConfig`] tree.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use config::DawnConfig;
pub use error::{CoreError, Result};
pub use time::{LocalZone, ManualClock, SystemClock, TimeSource};
pub use types::{Alarm, AlarmId, AudioSourceRef, DeviceRef, NewAlarm};
