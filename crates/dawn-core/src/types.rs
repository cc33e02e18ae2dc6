//! Alarm data model shared by the scheduler, engine and storage layers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

// ---------------------------------------------------------------------------
// AlarmId
// ---------------------------------------------------------------------------

/// Stable alarm identity, assigned by the store on first persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmId(pub i64);

impl AlarmId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AlarmId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for AlarmId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| CoreError::InvalidAlarm(format!("not an alarm id: {s}")))
    }
}

// ---------------------------------------------------------------------------
// References held by an alarm
// ---------------------------------------------------------------------------

/// Opaque reference to a user-chosen sound (a path, URI, or catalogue key).
///
/// Only the playback layer's resolver knows how to turn it into audio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioSourceRef(pub String);

impl AudioSourceRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AudioSourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The preferred short-range audio device for an alarm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRef {
    /// Hardware address, the unique key of the device.
    pub address: String,
    /// Name shown to the user; falls back to "Unknown Device" when blank.
    pub display_name: String,
}

impl DeviceRef {
    pub fn new(address: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.into(),
        }
    }

    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            "Unknown Device"
        } else {
            &self.display_name
        }
    }
}

// ---------------------------------------------------------------------------
// Alarm
// ---------------------------------------------------------------------------

/// A persisted alarm.
///
/// Values are immutable once handed to the scheduler: an edit produces a new
/// `Alarm` that supersedes the old one rather than mutating it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    /// Hour of day, 0–23 (local wall clock).
    pub hour: u8,
    /// Minute, 0–59.
    pub minute: u8,
    pub enabled: bool,
    pub audio_source: Option<AudioSourceRef>,
    pub device: Option<DeviceRef>,
    /// RFC-3339 timestamp of first persistence.
    pub created_at: String,
}

impl Alarm {
    /// Build an alarm, rejecting out-of-range times.
    pub fn new(id: AlarmId, hour: u8, minute: u8) -> Result<Self> {
        validate_time(hour, minute)?;
        Ok(Self {
            id,
            hour,
            minute,
            enabled: true,
            audio_source: None,
            device: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    pub fn with_audio_source(mut self, source: AudioSourceRef) -> Self {
        self.audio_source = Some(source);
        self
    }

    pub fn with_device(mut self, device: DeviceRef) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// `HH:MM`, zero padded.
    pub fn formatted_time(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }

    pub fn validate(&self) -> Result<()> {
        validate_time(self.hour, self.minute)
    }
}

/// An alarm that has not been persisted yet and therefore has no id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAlarm {
    pub hour: u8,
    pub minute: u8,
    pub enabled: bool,
    pub audio_source: Option<AudioSourceRef>,
    pub device: Option<DeviceRef>,
}

impl NewAlarm {
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        validate_time(hour, minute)?;
        Ok(Self {
            hour,
            minute,
            enabled: true,
            audio_source: None,
            device: None,
        })
    }

    pub fn with_audio_source(mut self, source: AudioSourceRef) -> Self {
        self.audio_source = Some(source);
        self
    }

    pub fn with_device(mut self, device: DeviceRef) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Attach the id assigned by the store.
    pub fn into_alarm(self, id: AlarmId, created_at: String) -> Alarm {
        Alarm {
            id,
            hour: self.hour,
            minute: self.minute,
            enabled: self.enabled,
            audio_source: self.audio_source,
            device: self.device,
            created_at,
        }
    }
}

/// Parse `HH:MM` into an (hour, minute) pair.
pub fn parse_time_of_day(s: &str) -> Result<(u8, u8)> {
    let (h, m) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| CoreError::InvalidAlarm(format!("expected HH:MM, got {s:?}")))?;
    let hour: u8 = h
        .parse()
        .map_err(|_| CoreError::InvalidAlarm(format!("bad hour in {s:?}")))?;
    let minute: u8 = m
        .parse()
        .map_err(|_| CoreError::InvalidAlarm(format!("bad minute in {s:?}")))?;
    validate_time(hour, minute)?;
    Ok((hour, minute))
}

fn validate_time(hour: u8, minute: u8) -> Result<()> {
    if hour > 23 {
        return Err(CoreError::InvalidAlarm(format!("hour {hour} out of range 0-23")));
    }
    if minute > 59 {
        return Err(CoreError::InvalidAlarm(format!(
            "minute {minute} out of range 0-59"
        )));
    }
    Ok(())
}
