use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use dawn_core::LocalZone;

use crate::error::{Result, SchedulerError};

/// Longest run of skipped local minutes searched when a wall-clock time
/// falls into a forward offset change.
const MAX_GAP_MINUTES: i64 = 24 * 60;

/// When an alarm is due, and how long until its delayed tasks should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirePlan {
    /// Absolute instant the alarm sounds.
    pub fire_at: DateTime<Utc>,
    /// What the local wall clock reads at `fire_at`.
    pub local_time: NaiveDateTime,
    /// Delay from "now" until `fire_at`.
    pub fire_delay: Duration,
    /// Delay until the device pre-connect should start, or `None` when the
    /// fire time is already inside the lead window.
    pub preconnect_delay: Option<Duration>,
}

/// Next instant strictly after `now` at which the local clock in `zone`
/// reads `hour:minute:00`.
///
/// Equality counts as "already passed", so an alarm saved at exactly its own
/// time rolls over to tomorrow. A reading that occurs twice on the night the
/// clocks go back resolves to the first one; a reading skipped when they go
/// forward resolves to the first valid instant after it.
pub fn next_fire_time(
    hour: u8,
    minute: u8,
    now: DateTime<Utc>,
    zone: &dyn LocalZone,
) -> Result<DateTime<Utc>> {
    let invalid = || SchedulerError::InvalidSchedule(format!("{hour:02}:{minute:02}"));
    let today = zone.to_local(now).date();
    for day in 0..=2 {
        let local = (today + chrono::Days::new(day))
            .and_hms_opt(hour as u32, minute as u32, 0)
            .ok_or_else(invalid)?;
        let instant = resolve_forward(zone, local).ok_or_else(invalid)?;
        if instant > now {
            return Ok(instant);
        }
    }
    Err(invalid())
}

fn resolve_forward(zone: &dyn LocalZone, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    (0..=MAX_GAP_MINUTES).find_map(|m| zone.resolve(local + chrono::Duration::minutes(m)))
}

/// Compute the full [`FirePlan`] for an alarm at `hour:minute`.
pub fn plan_alarm(
    hour: u8,
    minute: u8,
    now: DateTime<Utc>,
    zone: &dyn LocalZone,
    preconnect_lead: Duration,
) -> Result<FirePlan> {
    plan_alarm_after(hour, minute, now, now, zone, preconnect_lead)
}

/// Like [`plan_alarm`], but the occurrence must also lie strictly after
/// `after`. Used to re-arm from the occurrence that just fired, whatever the
/// wall clock says.
pub fn plan_alarm_after(
    hour: u8,
    minute: u8,
    now: DateTime<Utc>,
    after: DateTime<Utc>,
    zone: &dyn LocalZone,
    preconnect_lead: Duration,
) -> Result<FirePlan> {
    let fire_at = next_fire_time(hour, minute, now.max(after), zone)?;
    let fire_delay = (fire_at - now)
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| {
            SchedulerError::InvalidSchedule(format!("non-positive delay until {fire_at}"))
        })?;
    let preconnect_delay = fire_delay
        .checked_sub(preconnect_lead)
        .filter(|d| !d.is_zero());

    Ok(FirePlan {
        fire_at,
        local_time: zone.to_local(fire_at),
        fire_delay,
        preconnect_delay,
    })
}
