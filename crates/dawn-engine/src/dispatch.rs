use std::sync::Arc;

use dawn_device::DeviceConnectionManager;
use dawn_scheduler::{AlarmScheduler, DueTask, TaskPayload};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::orchestrator::{AlarmOrchestrator, FireOutcome};

/// Routes due tasks from the queue to the device manager and the orchestrator.
pub struct TaskDispatcher {
    orchestrator: AlarmOrchestrator,
    scheduler: Arc<AlarmScheduler>,
    device: Arc<DeviceConnectionManager>,
    /// Schedule the next day's occurrence as soon as an alarm fires.
    rearm_after_fire: bool,
}

impl TaskDispatcher {
    pub fn new(
        orchestrator: AlarmOrchestrator,
        scheduler: Arc<AlarmScheduler>,
        device: Arc<DeviceConnectionManager>,
        rearm_after_fire: bool,
    ) -> Self {
        Self {
            orchestrator,
            scheduler,
            device,
            rearm_after_fire,
        }
    }

    /// Consume due tasks until the channel closes or `shutdown` flips to `true`.
    ///
    /// Handlers run on their own tasks, so a slow fire never holds up a
    /// pre-connect for another alarm.
    pub async fn run(self, mut due: mpsc::Receiver<DueTask>, mut shutdown: watch::Receiver<bool>) {
        info!("task dispatcher started");
        loop {
            tokio::select! {
                task = due.recv() => match task {
                    Some(task) => self.dispatch(task),
                    None => {
                        warn!("due-task channel closed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("task dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn dispatch(&self, task: DueTask) {
        debug!(task = %task.key, "task due");
        match task.payload {
            TaskPayload::Preconnect { alarm_id, device } => {
                let manager = Arc::clone(&self.device);
                tokio::spawn(async move {
                    let outcome = manager.preconnect(&device.address).await;
                    debug!(%alarm_id, device = %device.label(), ?outcome, "pre-connect finished");
                });
            }
            TaskPayload::Fire {
                alarm,
                epoch,
                fire_at,
            } => {
                if self.rearm_after_fire && self.scheduler.ledger().is_live(alarm.id, epoch) {
                    if let Err(e) = self.scheduler.rearm_after(&alarm, fire_at) {
                        warn!(alarm_id = %alarm.id, error = %e, code = e.code(), "failed to re-arm alarm");
                    }
                }

                let orchestrator = self.orchestrator.clone();
                tokio::spawn(async move {
                    match orchestrator.on_fire(&alarm, epoch).await {
                        Ok(FireOutcome::Playing { run_id, .. }) => {
                            debug!(alarm_id = %alarm.id, %run_id, "alarm sounding")
                        }
                        Ok(FireOutcome::Cancelled) => {}
                        Err(e) => error!(alarm_id = %alarm.id, error = %e, code = e.code(), "alarm fire failed"),
                    }
                });
            }
        }
    }
}
