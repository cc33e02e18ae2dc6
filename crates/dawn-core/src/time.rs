//! Wall-clock seam. Everything that needs "now" asks a [`TimeSource`] so
//! tests can pin the clock.
//!
//! Time is kept as absolute instants (`DateTime<Utc>`). Alarms are set in
//! local wall-clock terms, so every source also names the [`LocalZone`]
//! those terms are read in.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};

/// Mapping between absolute instants and local wall-clock readings.
pub trait LocalZone: Send + Sync {
    fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime;

    /// The instant `local` denotes. The earlier one when the reading occurs
    /// twice (clocks turned back), `None` when it is skipped (clocks turned
    /// forward).
    fn resolve(&self, local: NaiveDateTime) -> Option<DateTime<Utc>>;
}

impl<Tz> LocalZone for Tz
where
    Tz: TimeZone + Send + Sync,
{
    fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(self).naive_local()
    }

    fn resolve(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.from_local_datetime(&local)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Supplies the current instant and the zone alarms are read in.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn zone(&self) -> &dyn LocalZone;

    /// `now()` as the local wall clock reads it.
    fn local_now(&self) -> NaiveDateTime {
        self.zone().to_local(self.now())
    }
}

/// The real clock, read in the host's zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn zone(&self) -> &dyn LocalZone {
        &Local
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    zone: Box<dyn LocalZone>,
}

impl ManualClock {
    /// A UTC clock whose wall clock reads `start`.
    pub fn new(start: NaiveDateTime) -> Self {
        Self::in_zone(Utc, start.and_utc())
    }

    pub fn in_zone(zone: impl LocalZone + 'static, start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            zone: Box::new(zone),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn zone(&self) -> &dyn LocalZone {
        self.zone.as_ref()
    }
}
