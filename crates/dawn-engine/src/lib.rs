//! `dawn-engine` — sequences a firing alarm across the device and playback layers.
//!
//! # Flow
//!
//! ```text
//! AlarmService ──► AlarmScheduler ──► TokioTaskQueue
//!                                          │ DueTask
//!                                          ▼
//!                                    TaskDispatcher
//!                            preconnect │        │ fire
//!                                       ▼        ▼
//!                   DeviceConnectionManager   AlarmOrchestrator ──► PlaybackController
//! ```
//!
//! The orchestrator never waits on the radio for longer than the grace period
//! and arms an auto-stop for every run it starts.

pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod run_state;
pub mod service;

pub use dispatch::TaskDispatcher;
pub use error::{EngineError, Result};
pub use orchestrator::{AlarmOrchestrator, FireOutcome, OrchestratorSettings};
pub use run_state::{AlarmEvent, RunId, RunPhase, RunSnapshot, StopReason};
pub use service::AlarmService;
