use std::sync::Arc;

use dawn_core::{Alarm, AlarmId, NewAlarm};
use dawn_scheduler::{AlarmScheduler, AlarmStore};
use tracing::info;

use crate::{error::Result, orchestrator::AlarmOrchestrator};

/// Alarm use cases: every mutation persists first, then re-plans the schedule.
///
/// Storage failures come back to the caller; nothing is scheduled for a
/// mutation that did not persist.
#[derive(Clone)]
pub struct AlarmService {
    store: Arc<dyn AlarmStore>,
    scheduler: Arc<AlarmScheduler>,
    orchestrator: AlarmOrchestrator,
}

impl AlarmService {
    pub fn new(
        store: Arc<dyn AlarmStore>,
        scheduler: Arc<AlarmScheduler>,
        orchestrator: AlarmOrchestrator,
    ) -> Self {
        Self {
            store,
            scheduler,
            orchestrator,
        }
    }

    pub fn list(&self) -> Result<Vec<Alarm>> {
        Ok(self.store.get_all()?)
    }

    pub fn get(&self, id: AlarmId) -> Result<Option<Alarm>> {
        Ok(self.store.get_by_id(id)?)
    }

    /// Persist a new alarm and schedule it if enabled.
    pub fn add(&self, alarm: NewAlarm) -> Result<Alarm> {
        let alarm = self.store.insert(alarm)?;
        self.replan(&alarm)?;
        Ok(alarm)
    }

    /// Persist an edited alarm and replace its schedule.
    pub fn save(&self, alarm: &Alarm) -> Result<()> {
        self.store.update(alarm)?;
        self.replan(alarm)
    }

    /// Toggle an alarm. Disabling also silences it if it is ringing.
    pub async fn set_enabled(&self, id: AlarmId, enabled: bool) -> Result<()> {
        self.store.set_enabled(id, enabled)?;
        if enabled {
            if let Some(alarm) = self.store.get_by_id(id)? {
                self.scheduler.schedule_alarm(&alarm)?;
            }
        } else {
            self.scheduler.cancel_alarm(id);
            self.orchestrator.stop(id).await;
        }
        Ok(())
    }

    /// Cancel, silence and remove an alarm.
    pub async fn delete(&self, id: AlarmId) -> Result<()> {
        self.scheduler.cancel_alarm(id);
        self.orchestrator.stop(id).await;
        self.store.delete(id)?;
        info!(alarm_id = %id, "alarm deleted");
        Ok(())
    }

    /// Boot hook: rebuild every delayed task from the stored enabled alarms.
    pub fn boot(&self) -> Result<usize> {
        let enabled = self.store.get_enabled()?;
        let armed = self.scheduler.reschedule_all(&enabled);
        info!(armed, "alarms restored after start");
        Ok(armed)
    }

    /// Explicit stop command for a ringing alarm.
    pub async fn stop(&self, id: AlarmId) -> bool {
        self.orchestrator.stop(id).await
    }

    fn replan(&self, alarm: &Alarm) -> Result<()> {
        self.scheduler.cancel_alarm(alarm.id);
        if alarm.enabled {
            self.scheduler.schedule_alarm(alarm)?;
        }
        Ok(())
    }
}
