//! `dawn-scheduler` — turns alarms into delayed tasks, and keeps them on disk.
//!
//! # Overview
//!
//! [`AlarmScheduler`] computes the next fire instant of a daily alarm and
//! registers two uniquely-keyed tasks with a [`TaskQueue`]:
//!
//! | Key              | Due at            | Registered when                     |
//! |------------------|-------------------|-------------------------------------|
//! | `preconnect:{id}`| fire time − lead  | alarm has a device, lead still ahead |
//! | `fire:{id}`      | fire time         | always                              |
//!
//! Re-scheduling an id replaces its tasks. [`TokioTaskQueue`] runs the timers
//! in-process and hands due work to the engine over an `mpsc` channel; tasks do
//! not survive a restart, so the boot path calls
//! [`AlarmScheduler::reschedule_all`] with the enabled alarms from the
//! [`AlarmStore`].

pub mod db;
pub mod error;
pub mod ledger;
pub mod queue;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod types;

pub use error::{Result, SchedulerError, StorageError, StorageResult};
pub use ledger::ArmingLedger;
pub use queue::{TaskQueue, TokioTaskQueue};
pub use schedule::{next_fire_time, plan_alarm, plan_alarm_after, FirePlan};
pub use scheduler::AlarmScheduler;
pub use store::{AlarmStore, SqliteAlarmStore};
pub use types::{alarm_tag, DueTask, ExistingTaskPolicy, TaskKey, TaskPayload, ALARM_TASK_TAG};
