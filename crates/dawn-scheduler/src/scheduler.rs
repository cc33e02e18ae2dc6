use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dawn_core::{Alarm, AlarmId, TimeSource};
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    ledger::ArmingLedger,
    queue::TaskQueue,
    schedule::{plan_alarm, plan_alarm_after, FirePlan},
    types::{alarm_tag, ExistingTaskPolicy, TaskKey, TaskPayload, ALARM_TASK_TAG},
};

/// Turns alarms into pairs of delayed tasks (`preconnect:{id}`, `fire:{id}`).
pub struct AlarmScheduler {
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn TimeSource>,
    ledger: Arc<ArmingLedger>,
    preconnect_lead: Duration,
}

impl AlarmScheduler {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn TimeSource>,
        ledger: Arc<ArmingLedger>,
        preconnect_lead: Duration,
    ) -> Self {
        Self {
            queue,
            clock,
            ledger,
            preconnect_lead,
        }
    }

    pub fn ledger(&self) -> &Arc<ArmingLedger> {
        &self.ledger
    }

    /// Register (or replace) the delayed tasks for `alarm`.
    ///
    /// The pre-connect task is only registered when the alarm names a device
    /// and the fire time is further away than the lead; otherwise any stale
    /// pre-connect task for the id is removed.
    pub fn schedule_alarm(&self, alarm: &Alarm) -> Result<FirePlan> {
        let plan = plan_alarm(
            alarm.hour,
            alarm.minute,
            self.clock.now(),
            self.clock.zone(),
            self.preconnect_lead,
        )?;
        self.arm(alarm, plan)
    }

    /// Schedule the occurrence after `fired_at`, the one that just rang.
    ///
    /// A wall clock still reading a moment before `fired_at` must not plan
    /// the same occurrence again.
    pub fn rearm_after(&self, alarm: &Alarm, fired_at: DateTime<Utc>) -> Result<FirePlan> {
        let plan = plan_alarm_after(
            alarm.hour,
            alarm.minute,
            self.clock.now(),
            fired_at,
            self.clock.zone(),
            self.preconnect_lead,
        )?;
        self.arm(alarm, plan)
    }

    fn arm(&self, alarm: &Alarm, plan: FirePlan) -> Result<FirePlan> {
        let epoch = self.ledger.arm(alarm.id);
        let tags = vec![ALARM_TASK_TAG.to_string(), alarm_tag(alarm.id)];

        self.queue.enqueue_unique(
            TaskKey::fire(alarm.id),
            plan.fire_delay,
            TaskPayload::Fire {
                alarm: alarm.clone(),
                epoch,
                fire_at: plan.fire_at,
            },
            tags.clone(),
            ExistingTaskPolicy::Replace,
        )?;

        let preconnect_key = TaskKey::preconnect(alarm.id);
        match (plan.preconnect_delay, &alarm.device) {
            (Some(delay), Some(device)) => {
                self.queue.enqueue_unique(
                    preconnect_key,
                    delay,
                    TaskPayload::Preconnect {
                        alarm_id: alarm.id,
                        device: device.clone(),
                    },
                    tags,
                    ExistingTaskPolicy::Replace,
                )?;
            }
            _ => {
                if self.queue.cancel(&preconnect_key) {
                    debug!(alarm_id = %alarm.id, "stale pre-connect task removed");
                }
            }
        }

        info!(
            alarm_id = %alarm.id,
            fire_at = %plan.fire_at,
            local_time = %plan.local_time,
            delay_secs = plan.fire_delay.as_secs(),
            preconnect = plan.preconnect_delay.is_some() && alarm.device.is_some(),
            "alarm scheduled"
        );
        Ok(plan)
    }

    /// Remove both delayed tasks for `id` and revoke its arming. Never fails.
    pub fn cancel_alarm(&self, id: AlarmId) {
        self.ledger.revoke(id);
        let fire = self.queue.cancel(&TaskKey::fire(id));
        let preconnect = self.queue.cancel(&TaskKey::preconnect(id));
        debug!(alarm_id = %id, fire, preconnect, "alarm cancelled");
    }

    /// Drop every alarm task and schedule the enabled alarms in `alarms` afresh.
    ///
    /// An alarm that cannot be scheduled is logged and skipped so one bad
    /// record never keeps the rest from ringing. Returns how many were armed.
    pub fn reschedule_all(&self, alarms: &[Alarm]) -> usize {
        let removed = self.queue.cancel_all_tagged(ALARM_TASK_TAG);
        self.ledger.revoke_all();

        let mut armed = 0;
        for alarm in alarms.iter().filter(|a| a.enabled) {
            match self.schedule_alarm(alarm) {
                Ok(_) => armed += 1,
                Err(e) => {
                    warn!(alarm_id = %alarm.id, error = %e, code = e.code(), "failed to reschedule alarm")
                }
            }
        }
        info!(removed, armed, "alarms rescheduled");
        armed
    }

    pub fn pending_tasks(&self) -> Vec<TaskKey> {
        self.queue.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TokioTaskQueue;
    use crate::types::DueTask;
    use chrono::{NaiveDate, TimeZone};
    use dawn_core::{DeviceRef, ManualClock};
    use tokio::sync::mpsc;

    struct Harness {
        scheduler: AlarmScheduler,
        clock: Arc<ManualClock>,
        rx: mpsc::Receiver<DueTask>,
    }

    fn harness() -> Harness {
        let (tx, rx) = mpsc::channel(16);
        let clock = Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2026, 3, 10)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap(),
        ));
        let scheduler = AlarmScheduler::new(
            Arc::new(TokioTaskQueue::new(tx)),
            clock.clone(),
            Arc::new(ArmingLedger::new()),
            Duration::from_secs(60),
        );
        Harness {
            scheduler,
            clock,
            rx,
        }
    }

    fn alarm(id: i64, hour: u8, minute: u8) -> Alarm {
        Alarm::new(AlarmId(id), hour, minute).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn registers_fire_and_preconnect_when_device_present() {
        let h = harness();
        let a = alarm(1, 7, 0).with_device(DeviceRef::new("AA:BB", "Speaker"));
        h.scheduler.schedule_alarm(&a).unwrap();
        assert_eq!(
            h.scheduler.pending_tasks(),
            vec![TaskKey::fire(AlarmId(1)), TaskKey::preconnect(AlarmId(1))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_preconnect_without_device() {
        let h = harness();
        h.scheduler.schedule_alarm(&alarm(1, 7, 0)).unwrap();
        assert_eq!(h.scheduler.pending_tasks(), vec![TaskKey::fire(AlarmId(1))]);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_same_id_replaces_tasks() {
        let mut h = harness();
        let a = alarm(1, 7, 0).with_device(DeviceRef::new("AA:BB", "Speaker"));
        h.scheduler.schedule_alarm(&a).unwrap();
        h.scheduler.schedule_alarm(&a).unwrap();
        assert_eq!(h.scheduler.pending_tasks().len(), 2);

        // Dropping the device on edit also drops the pre-connect task.
        h.scheduler.schedule_alarm(&alarm(1, 7, 0)).unwrap();
        assert_eq!(h.scheduler.pending_tasks(), vec![TaskKey::fire(AlarmId(1))]);

        let due = h.rx.recv().await.unwrap();
        assert_eq!(due.key, TaskKey::fire(AlarmId(1)));
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_removes_both_tasks_and_revokes() {
        let h = harness();
        let a = alarm(4, 7, 0).with_device(DeviceRef::new("AA:BB", "Speaker"));
        h.scheduler.schedule_alarm(&a).unwrap();
        let epoch = h.scheduler.ledger().current(AlarmId(4)).unwrap();

        h.scheduler.cancel_alarm(AlarmId(4));
        h.scheduler.cancel_alarm(AlarmId(4));
        assert!(h.scheduler.pending_tasks().is_empty());
        assert!(!h.scheduler.ledger().is_live(AlarmId(4), epoch));
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_all_only_arms_enabled() {
        let h = harness();
        h.scheduler.schedule_alarm(&alarm(9, 8, 0)).unwrap();
        h.clock.advance(chrono::Duration::minutes(5));

        let alarms = vec![alarm(1, 7, 0), alarm(2, 7, 30).with_enabled(false)];
        assert_eq!(h.scheduler.reschedule_all(&alarms), 1);
        assert_eq!(h.scheduler.pending_tasks(), vec![TaskKey::fire(AlarmId(1))]);
    }

    #[tokio::test(start_paused = true)]
    async fn fire_task_carries_planned_occurrence() {
        let mut h = harness();
        let plan = h.scheduler.schedule_alarm(&alarm(3, 7, 0)).unwrap();
        assert_eq!(plan.fire_at, Utc.with_ymd_and_hms(2026, 3, 10, 7, 0, 0).unwrap());

        let due = h.rx.recv().await.unwrap();
        match due.payload {
            TaskPayload::Fire { fire_at, epoch, .. } => {
                assert_eq!(fire_at, plan.fire_at);
                assert!(h.scheduler.ledger().is_live(AlarmId(3), epoch));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_with_lagging_clock_skips_to_next_day() {
        let h = harness();
        let a = alarm(5, 7, 0);
        let first = h.scheduler.schedule_alarm(&a).unwrap();

        // The timer ran out a hair before the wall clock reached the occurrence.
        h.clock.set(first.fire_at - chrono::Duration::milliseconds(1));
        let next = h.scheduler.rearm_after(&a, first.fire_at).unwrap();

        assert_eq!(next.fire_at, first.fire_at + chrono::Duration::days(1));
        assert_eq!(
            next.fire_delay,
            Duration::from_secs(24 * 3600) + Duration::from_millis(1)
        );
        assert_eq!(h.scheduler.pending_tasks(), vec![TaskKey::fire(AlarmId(5))]);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_with_late_clock_plans_from_now() {
        let h = harness();
        let a = alarm(6, 7, 0);
        let first = h.scheduler.schedule_alarm(&a).unwrap();

        // Woken two days late: the next occurrence is still ahead of now.
        h.clock.set(first.fire_at + chrono::Duration::days(2) + chrono::Duration::hours(1));
        let next = h.scheduler.rearm_after(&a, first.fire_at).unwrap();
        assert_eq!(next.fire_at, first.fire_at + chrono::Duration::days(3));
        assert_eq!(next.fire_delay, Duration::from_secs(23 * 3600));
    }
}
