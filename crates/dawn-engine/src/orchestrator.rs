use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dawn_core::{Alarm, AlarmId, DawnConfig, TimeSource};
use dawn_device::{ConnectionState, DeviceConnectionManager};
use dawn_playback::{
    EndReason, PlayReport, PlaybackController, PlaybackError, PlaybackEvent, SessionId,
};
use dawn_scheduler::ArmingLedger;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{EngineError, Result},
    run_state::{AlarmEvent, RunId, RunPhase, RunSnapshot, StopReason},
};

/// Tunables for the fire sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// How long a fire waits on a connection already in progress.
    pub grace_period: Duration,
    /// Playback is stopped after this long.
    pub max_duration: Duration,
    pub ramp_enabled: bool,
    /// Immediate retries when the output is denied.
    pub focus_retries: u32,
}

impl OrchestratorSettings {
    pub fn from_config(config: &DawnConfig) -> Self {
        Self {
            grace_period: config.device.grace_period(),
            max_duration: config.alarm.max_duration(),
            ramp_enabled: config.playback.ramp_enabled,
            focus_retries: config.playback.focus_retries,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&DawnConfig::default())
    }
}

/// How a fire ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Playing { run_id: RunId, report: PlayReport },
    /// The alarm was cancelled before or while the fire ran.
    Cancelled,
}

struct ActiveRun {
    run_id: RunId,
    phase: RunPhase,
    started_at: chrono::NaiveDateTime,
    session: Option<SessionId>,
    device_address: Option<String>,
    /// Ends the auto-stop timer and the playback watcher.
    token: CancellationToken,
}

type RunSlot = Arc<Mutex<Option<ActiveRun>>>;

struct Inner {
    playback: Arc<PlaybackController>,
    device: Arc<DeviceConnectionManager>,
    ledger: Arc<ArmingLedger>,
    clock: Arc<dyn TimeSource>,
    settings: OrchestratorSettings,
    runs: DashMap<AlarmId, RunSlot>,
    /// Device address of every run that asked for one.
    device_claims: DashMap<RunId, String>,
    events: broadcast::Sender<AlarmEvent>,
}

/// Sequences a firing alarm: device grace window, playback, auto-stop.
///
/// Each alarm id has its own slot, locked for the whole of every transition
/// (fire, stop, supersede), so at most one run per id exists at any time.
/// Device problems never stop the sound; only playback can fail a run.
#[derive(Clone)]
pub struct AlarmOrchestrator {
    inner: Arc<Inner>,
}

impl AlarmOrchestrator {
    pub fn new(
        playback: Arc<PlaybackController>,
        device: Arc<DeviceConnectionManager>,
        ledger: Arc<ArmingLedger>,
        clock: Arc<dyn TimeSource>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                playback,
                device,
                ledger,
                clock,
                settings,
                runs: DashMap::new(),
                device_claims: DashMap::new(),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.inner.events.subscribe()
    }

    /// Run the fire sequence for `alarm`, armed under `epoch`.
    ///
    /// Returns [`EngineError::PlaybackFailed`] only when no sound could be
    /// produced after the fallback source and the focus retries.
    pub async fn on_fire(&self, alarm: &Alarm, epoch: u64) -> Result<FireOutcome> {
        let inner = &self.inner;
        if !inner.ledger.is_live(alarm.id, epoch) {
            info!(alarm_id = %alarm.id, "alarm cancelled before it fired");
            return Ok(FireOutcome::Cancelled);
        }

        let run_id = RunId::new();
        let device_address = alarm.device.as_ref().map(|d| d.address.clone());

        let slot = self.slot(alarm.id);
        let mut run = slot.lock().await;
        // Claimed before the old run lets go, so a shared link stays up.
        if let Some(address) = &device_address {
            inner.device_claims.insert(run_id.clone(), address.clone());
        }
        if let Some(previous) = run.take() {
            info!(alarm_id = %alarm.id, run_id = %previous.run_id, "superseding active run");
            self.finish(alarm.id, previous, StopReason::Superseded).await;
        }

        *run = Some(ActiveRun {
            run_id: run_id.clone(),
            phase: RunPhase::Preconnecting,
            started_at: inner.clock.local_now(),
            session: None,
            device_address: device_address.clone(),
            token: CancellationToken::new(),
        });
        info!(alarm_id = %alarm.id, %run_id, time = %alarm.formatted_time(), "alarm fired");
        self.emit(AlarmEvent::Fired {
            alarm_id: alarm.id,
            run_id: run_id.clone(),
        });

        if let Some(address) = device_address.as_deref() {
            self.settle_device(alarm.id, address).await;
        }

        if !inner.ledger.is_live(alarm.id, epoch) {
            info!(alarm_id = %alarm.id, "alarm cancelled during fire");
            *run = None;
            inner.device_claims.remove(&run_id);
            self.emit(AlarmEvent::Stopped {
                alarm_id: alarm.id,
                run_id,
                reason: StopReason::Cancelled,
            });
            return Ok(FireOutcome::Cancelled);
        }

        // Subscribe before playing so an immediate end is not missed.
        let playback_events = inner.playback.subscribe();
        let report = match self.play_with_retry(alarm).await {
            Ok(report) => report,
            Err(e) => {
                error!(alarm_id = %alarm.id, %run_id, error = %e, code = e.code(), "alarm fired without sound");
                *run = None;
                inner.device_claims.remove(&run_id);
                self.emit(AlarmEvent::PlaybackFailed {
                    alarm_id: alarm.id,
                    run_id,
                    error: e.to_string(),
                });
                return Err(EngineError::PlaybackFailed {
                    alarm_id: alarm.id,
                    source: e,
                });
            }
        };

        let token = match run.as_mut() {
            Some(active) => {
                active.phase = RunPhase::Playing;
                active.session = Some(report.session);
                active.token.clone()
            }
            None => CancellationToken::new(),
        };
        self.spawn_run_watch(alarm.id, run_id.clone(), report.session, token, playback_events);

        self.emit(AlarmEvent::Playing {
            alarm_id: alarm.id,
            run_id: run_id.clone(),
            location: report.location.clone(),
            fell_back: report.fell_back,
        });
        Ok(FireOutcome::Playing { run_id, report })
    }

    /// Stop the run for `id`, if any. Returns whether one was active.
    pub async fn stop(&self, id: AlarmId) -> bool {
        self.stop_with(id, None, StopReason::Explicit).await
    }

    /// Stop every active run. Returns how many were stopped.
    pub async fn stop_all(&self, reason: StopReason) -> usize {
        let mut stopped = 0;
        for id in self.active_alarms() {
            if self.stop_with(id, None, reason.clone()).await {
                stopped += 1;
            }
        }
        stopped
    }

    pub async fn snapshot(&self, id: AlarmId) -> Option<RunSnapshot> {
        let slot = self.inner.runs.get(&id).map(|s| Arc::clone(s.value()))?;
        let run = slot.lock().await;
        let active = run.as_ref()?;
        Some(RunSnapshot {
            run_id: active.run_id.clone(),
            alarm_id: id,
            phase: active.phase,
            volume_percent: self.inner.playback.volume(),
            connection_attempts: self.inner.device.attempts(),
            started_at: active.started_at,
            session: active.session,
        })
    }

    /// Ids with a slot; some may have finished since.
    pub fn active_alarms(&self) -> Vec<AlarmId> {
        let mut ids: Vec<AlarmId> = self.inner.runs.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn slot(&self, id: AlarmId) -> RunSlot {
        Arc::clone(
            self.inner
                .runs
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .value(),
        )
    }

    fn emit(&self, event: AlarmEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Give an in-flight connection the grace window, or start one in the
    /// background. Never fails and never waits past the grace period.
    async fn settle_device(&self, alarm_id: AlarmId, address: &str) {
        let device = &self.inner.device;
        if device.is_connecting_to(address) {
            let linked = device.wait_connected(self.inner.settings.grace_period).await;
            debug!(%alarm_id, address, linked, "device grace window over");
            return;
        }
        let on_target = device.target().as_deref() == Some(address);
        if on_target && device.state() == ConnectionState::Connected {
            return;
        }

        debug!(%alarm_id, address, "no pre-connect underway, connecting in background");
        let device = Arc::clone(device);
        let address = address.to_string();
        tokio::spawn(async move {
            device.preconnect(&address).await;
        });
    }

    async fn play_with_retry(&self, alarm: &Alarm) -> std::result::Result<PlayReport, PlaybackError> {
        let settings = &self.inner.settings;
        let mut retries_left = settings.focus_retries;
        loop {
            match self
                .inner
                .playback
                .play(alarm.audio_source.as_ref(), settings.ramp_enabled)
                .await
            {
                Err(PlaybackError::FocusDenied) if retries_left > 0 => {
                    retries_left -= 1;
                    warn!(alarm_id = %alarm.id, retries_left, "audio focus denied, retrying");
                }
                other => return other,
            }
        }
    }

    /// Auto-stop timer and playback-end watcher for one run.
    fn spawn_run_watch(
        &self,
        alarm_id: AlarmId,
        run_id: RunId,
        session: SessionId,
        token: CancellationToken,
        mut playback_events: broadcast::Receiver<PlaybackEvent>,
    ) {
        let orchestrator = self.clone();
        let max_duration = self.inner.settings.max_duration;
        tokio::spawn(async move {
            let reason = tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(max_duration) => StopReason::Timeout,
                reason = playback_ended(&mut playback_events, session) => reason,
            };
            if reason == StopReason::Timeout {
                info!(%alarm_id, %run_id, secs = max_duration.as_secs(), "alarm reached max duration");
            }
            orchestrator.stop_with(alarm_id, Some(run_id), reason).await;
        });
    }

    /// Stop the run for `id` (only `run_id`, when given).
    async fn stop_with(&self, id: AlarmId, run_id: Option<RunId>, reason: StopReason) -> bool {
        let Some(slot) = self.inner.runs.get(&id).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        let mut run = slot.lock().await;
        let matches = run
            .as_ref()
            .is_some_and(|active| run_id.as_ref().map_or(true, |r| *r == active.run_id));
        if !matches {
            return false;
        }
        match run.take() {
            Some(active) => {
                self.finish(id, active, reason).await;
                true
            }
            None => false,
        }
    }

    /// The stop path: timer, sound, radio, then the event.
    ///
    /// The link is dropped only while it is still the one this run asked for
    /// and no other run (including the one superseding this) claims it.
    async fn finish(&self, alarm_id: AlarmId, run: ActiveRun, reason: StopReason) {
        run.token.cancel();
        if let Some(session) = run.session {
            self.inner.playback.stop_session(session);
        }
        if let Some(address) = run.device_address.as_deref() {
            self.inner.device_claims.remove(&run.run_id);
            if self.device_unclaimed(address) {
                self.inner.device.disconnect().await;
            } else {
                debug!(%alarm_id, address, "device still in use, link kept");
            }
        }
        info!(%alarm_id, run_id = %run.run_id, ?reason, "alarm stopped");
        self.emit(AlarmEvent::Stopped {
            alarm_id,
            run_id: run.run_id,
            reason,
        });
    }

    fn device_unclaimed(&self, address: &str) -> bool {
        let inner = &self.inner;
        inner.device.target().as_deref() == Some(address)
            && !inner.device_claims.iter().any(|claim| claim.value() == address)
    }
}

/// Resolves when `session` ends for a reason other than our own stop.
async fn playback_ended(
    events: &mut broadcast::Receiver<PlaybackEvent>,
    session: SessionId,
) -> StopReason {
    loop {
        match events.recv().await {
            Ok(PlaybackEvent::Ended {
                session: ended,
                reason,
            }) if ended == session => {
                return match reason {
                    EndReason::FocusLost => StopReason::PlaybackEnded("audio focus lost".into()),
                    EndReason::OutputError(e) => StopReason::PlaybackEnded(e),
                    EndReason::Superseded => StopReason::Superseded,
                    EndReason::Stopped => StopReason::PlaybackEnded("playback stopped".into()),
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "playback event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_config() {
        let mut config = DawnConfig::default();
        config.device.grace_period_ms = 1_500;
        config.playback.ramp_enabled = false;

        let settings = OrchestratorSettings::from_config(&config);
        assert_eq!(settings.grace_period, Duration::from_millis(1_500));
        assert_eq!(settings.max_duration, Duration::from_secs(300));
        assert!(!settings.ramp_enabled);
        assert_eq!(settings.focus_retries, 1);
    }

    #[tokio::test]
    async fn session_end_maps_to_stop_reason() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(PlaybackEvent::Ended {
            session: SessionId(1),
            reason: EndReason::Stopped,
        })
        .unwrap();
        tx.send(PlaybackEvent::Ended {
            session: SessionId(2),
            reason: EndReason::OutputError("decoder crashed".into()),
        })
        .unwrap();

        // Session 1 is someone else's; only session 2 counts.
        let reason = playback_ended(&mut rx, SessionId(2)).await;
        assert_eq!(reason, StopReason::PlaybackEnded("decoder crashed".into()));
    }
}
