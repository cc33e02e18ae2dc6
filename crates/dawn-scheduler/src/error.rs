use dawn_core::{AlarmId, CoreError};
use thiserror::Error;

/// Errors raised by the alarm store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No alarm with the given id exists in the store.
    #[error("Alarm not found: {id}")]
    NotFound { id: AlarmId },

    /// A stored row could not be turned back into an alarm.
    #[error("Corrupt alarm record: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::Database(_) => "STORAGE_DATABASE",
            StorageError::NotFound { .. } => "ALARM_NOT_FOUND",
            StorageError::Corrupt(_) => "STORAGE_CORRUPT",
        }
    }
}

impl From<CoreError> for StorageError {
    fn from(e: CoreError) -> Self {
        StorageError::Corrupt(e.to_string())
    }
}

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The computed delay was not positive.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The delayed task queue refused the work item.
    #[error("Task queue error: {0}")]
    Queue(String),
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::Storage(e) => e.code(),
            SchedulerError::Queue(_) => "QUEUE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
pub type StorageResult<T> = std::result::Result<T, StorageError>;
