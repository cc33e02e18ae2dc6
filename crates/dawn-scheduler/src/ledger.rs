use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dawn_core::AlarmId;

/// Records which alarms are currently armed, and under which epoch.
///
/// Cancelling an alarm revokes its entry. A fire task that was already
/// running when the cancel landed carries the epoch it was armed under and
/// sees through [`ArmingLedger::is_live`] that it must abort.
#[derive(Debug, Default)]
pub struct ArmingLedger {
    epochs: DashMap<AlarmId, u64>,
    counter: AtomicU64,
}

impl ArmingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `id` and return the new epoch. Epochs only ever increase.
    pub fn arm(&self, id: AlarmId) -> u64 {
        let epoch = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.epochs.insert(id, epoch);
        epoch
    }

    pub fn revoke(&self, id: AlarmId) -> bool {
        self.epochs.remove(&id).is_some()
    }

    pub fn revoke_all(&self) {
        self.epochs.clear();
    }

    /// `true` while the arming `epoch` belongs to has not been revoked.
    ///
    /// A later re-arm (the next day's occurrence) keeps earlier epochs live.
    pub fn is_live(&self, id: AlarmId, epoch: u64) -> bool {
        self.epochs.get(&id).is_some_and(|current| *current >= epoch)
    }

    pub fn current(&self, id: AlarmId) -> Option<u64> {
        self.epochs.get(&id).map(|e| *e)
    }
}
