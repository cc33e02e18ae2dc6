use std::fmt;

use chrono::NaiveDateTime;
use dawn_core::AlarmId;
use dawn_playback::SessionId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one firing of an alarm (UUIDv7, time-sortable in logs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Preconnecting,
    Playing,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A user or external command stopped it.
    Explicit,
    /// The maximum alarm duration elapsed.
    Timeout,
    /// A newer fire of the same alarm took over.
    Superseded,
    /// The alarm was cancelled while the fire was in progress.
    Cancelled,
    /// Playback ended on its own (focus lost for good, output error).
    PlaybackEnded(String),
    /// The engine is shutting down.
    Shutdown,
}

/// Point-in-time view of a firing alarm. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub alarm_id: AlarmId,
    pub phase: RunPhase,
    pub volume_percent: u8,
    pub connection_attempts: u32,
    pub started_at: NaiveDateTime,
    pub session: Option<SessionId>,
}

/// Published for every run transition; the hook for notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmEvent {
    Fired {
        alarm_id: AlarmId,
        run_id: RunId,
    },
    Playing {
        alarm_id: AlarmId,
        run_id: RunId,
        location: String,
        fell_back: bool,
    },
    /// The alarm fired but no sound could be produced.
    PlaybackFailed {
        alarm_id: AlarmId,
        run_id: RunId,
        error: String,
    },
    Stopped {
        alarm_id: AlarmId,
        run_id: RunId,
        reason: StopReason,
    },
}

impl AlarmEvent {
    pub fn alarm_id(&self) -> AlarmId {
        match self {
            AlarmEvent::Fired { alarm_id, .. }
            | AlarmEvent::Playing { alarm_id, .. }
            | AlarmEvent::PlaybackFailed { alarm_id, .. }
            | AlarmEvent::Stopped { alarm_id, .. } => *alarm_id,
        }
    }
}
