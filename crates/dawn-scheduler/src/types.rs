use std::fmt;

use chrono::{DateTime, Utc};
use dawn_core::{Alarm, AlarmId, DeviceRef};

/// Tag carried by every task the alarm scheduler registers.
pub const ALARM_TASK_TAG: &str = "alarm";

/// Per-alarm tag, e.g. `alarm:7`.
pub fn alarm_tag(id: AlarmId) -> String {
    format!("{ALARM_TASK_TAG}:{id}")
}

/// Deterministic, unique key of a delayed task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey(String);

impl TaskKey {
    /// `fire:{id}`
    pub fn fire(id: AlarmId) -> Self {
        Self(format!("fire:{id}"))
    }

    /// `preconnect:{id}`
    pub fn preconnect(id: AlarmId) -> Self {
        Self(format!("preconnect:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What to do when a task with the same key is already pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingTaskPolicy {
    /// Cancel the pending task and register the new one.
    #[default]
    Replace,
    /// Leave the pending task alone and drop the new one.
    Keep,
}

/// Work item delivered when a delayed task comes due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPayload {
    /// Sound the alarm. `epoch` is the arming the task was registered under,
    /// `fire_at` the occurrence it was planned for.
    Fire {
        alarm: Alarm,
        epoch: u64,
        fire_at: DateTime<Utc>,
    },
    /// Best-effort device connection ahead of the fire time.
    Preconnect { alarm_id: AlarmId, device: DeviceRef },
}

impl TaskPayload {
    pub fn alarm_id(&self) -> AlarmId {
        match self {
            TaskPayload::Fire { alarm, .. } => alarm.id,
            TaskPayload::Preconnect { alarm_id, .. } => *alarm_id,
        }
    }
}

/// A task whose delay has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTask {
    pub key: TaskKey,
    pub payload: TaskPayload,
}
