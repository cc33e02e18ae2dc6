use dawn_core::AlarmId;
use dawn_playback::PlaybackError;
use dawn_scheduler::{SchedulerError, StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The alarm fired but produced no sound.
    #[error("Alarm {alarm_id} fired without sound: {source}")]
    PlaybackFailed {
        alarm_id: AlarmId,
        #[source]
        source: PlaybackError,
    },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::PlaybackFailed { .. } => "PLAYBACK_FAILED",
            EngineError::Scheduler(e) => e.code(),
            EngineError::Storage(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
