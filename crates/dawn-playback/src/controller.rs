use std::fmt;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, Weak,
};

use dawn_core::AudioSourceRef;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{PlaybackError, Result},
    output::{AudioOutput, AudioUsage, OutputEvent, PlaybackHandle, SourceResolver, StreamConfig},
    ramp::{RampSettings, VolumeRamp},
};

/// `Idle → FocusRequested → Playing ⇄ Paused → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    FocusRequested,
    Playing,
    Paused,
    Stopped,
}

/// Identifies one `play` call, so stale triggers cannot stop a newer sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Stopped,
    FocusLost,
    OutputError(String),
    /// A newer `play` call took over the output.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started { session: SessionId },
    Ended { session: SessionId, reason: EndReason },
}

/// What `play` ended up playing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayReport {
    pub session: SessionId,
    pub location: String,
    /// The chosen source failed and the default sound is playing instead.
    pub fell_back: bool,
}

struct PlaySession {
    id: SessionId,
    handle: Box<dyn PlaybackHandle>,
    ramp: Option<VolumeRamp>,
    ramp_enabled: bool,
    listener: CancellationToken,
}

/// Sole owner of the audio output.
///
/// Every exit path (explicit stop, focus loss, output error, a newer `play`)
/// goes through one teardown that runs exactly once per session: the session
/// is taken out of its slot under the lock, so only one caller ever holds it.
pub struct PlaybackController {
    output: Arc<dyn AudioOutput>,
    resolver: Arc<dyn SourceResolver>,
    settings: RampSettings,
    state: watch::Sender<PlaybackState>,
    level: Arc<watch::Sender<u8>>,
    session: Mutex<Option<PlaySession>>,
    play_lock: tokio::sync::Mutex<()>,
    next_session: AtomicU64,
    events: broadcast::Sender<PlaybackEvent>,
}

impl PlaybackController {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        resolver: Arc<dyn SourceResolver>,
        settings: RampSettings,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(PlaybackState::Idle);
        let (level, _) = watch::channel(settings.initial);
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            output,
            resolver,
            settings,
            state,
            level: Arc::new(level),
            session: Mutex::new(None),
            play_lock: tokio::sync::Mutex::new(()),
            next_session: AtomicU64::new(0),
            events,
        })
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.state.subscribe()
    }

    /// Current output level in percent.
    pub fn volume(&self) -> u8 {
        *self.level.borrow()
    }

    pub fn subscribe_volume(&self) -> watch::Receiver<u8> {
        self.level.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn current_session(&self) -> Option<SessionId> {
        lock(&self.session).as_ref().map(|s| s.id)
    }

    pub fn ramp_running(&self) -> bool {
        lock(&self.session)
            .as_ref()
            .and_then(|s| s.ramp.as_ref())
            .is_some_and(VolumeRamp::is_running)
    }

    /// Take the output and start looping `source` (or the default sound).
    ///
    /// Fails with [`PlaybackError::FocusDenied`] without touching anything else
    /// when the output is refused. A source that cannot be resolved or opened
    /// is replaced by the default sound once; if that fails too the call fails.
    pub async fn play(
        self: &Arc<Self>,
        source: Option<&AudioSourceRef>,
        ramp_enabled: bool,
    ) -> Result<PlayReport> {
        let _serial = self.play_lock.lock().await;
        self.stop_current(EndReason::Superseded);

        self.state.send_replace(PlaybackState::FocusRequested);
        if !self.output.request_focus(AudioUsage::Alarm) {
            self.state.send_replace(PlaybackState::Idle);
            warn!("audio focus denied");
            return Err(PlaybackError::FocusDenied);
        }

        // Subscribe before the stream starts so no arbitration event is lost.
        let output_events = self.output.subscribe();

        let (mut handle, location, fell_back) = match self.open_source(source).await {
            Ok(opened) => opened,
            Err(e) => {
                self.abort_play();
                return Err(e);
            }
        };
        if let Err(e) = handle.start() {
            handle.release();
            self.abort_play();
            return Err(e);
        }

        self.level.send_replace(self.settings.initial);
        self.output.set_volume(self.settings.initial);

        let id = SessionId(self.next_session.fetch_add(1, Ordering::SeqCst) + 1);
        let listener = CancellationToken::new();
        let ramp = ramp_enabled.then(|| self.start_ramp());
        *lock(&self.session) = Some(PlaySession {
            id,
            handle,
            ramp,
            ramp_enabled,
            listener: listener.clone(),
        });
        self.state.send_replace(PlaybackState::Playing);
        tokio::spawn(listen(Arc::downgrade(self), id, output_events, listener));

        let _ = self.events.send(PlaybackEvent::Started { session: id });
        info!(session = %id, %location, fell_back, ramp_enabled, "alarm playback started");
        Ok(PlayReport {
            session: id,
            location,
            fell_back,
        })
    }

    /// Stop whatever is playing. Returns whether there was anything to stop.
    pub fn stop(&self) -> bool {
        self.stop_current(EndReason::Stopped)
    }

    /// Stop `session` only if it is still the one playing.
    pub fn stop_session(&self, session: SessionId) -> bool {
        self.end_session(session, EndReason::Stopped)
    }

    /// Transient loss: silence the stream and the ramp, keep the output reserved.
    pub fn pause(&self) {
        if let Some(id) = self.current_session() {
            self.pause_session(id);
        }
    }

    /// Regain: restart the stream and continue the ramp from the current level.
    pub fn resume(&self) {
        if let Some(id) = self.current_session() {
            self.resume_session(id);
        }
    }

    /// Halve the level. Ramp state is untouched.
    pub fn duck(&self) {
        if let Some(id) = self.current_session() {
            self.duck_session(id);
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn open_source(
        &self,
        source: Option<&AudioSourceRef>,
    ) -> Result<(Box<dyn PlaybackHandle>, String, bool)> {
        let config = StreamConfig::alarm();

        if let Some(source) = source {
            match self.resolver.resolve(source).await {
                Ok(stream) => match self.output.open(&stream, config).await {
                    Ok(handle) => return Ok((handle, stream.location, false)),
                    Err(e) => {
                        warn!(%source, error = %e, "alarm sound failed to open, using default")
                    }
                },
                Err(e) => {
                    warn!(%source, error = %e, code = e.code(), "alarm sound unresolvable, using default")
                }
            }
        }

        let stream = self
            .resolver
            .resolve_default()
            .await
            .map_err(|e| PlaybackError::SourceResolution(format!("default sound: {e}")))?;
        let handle = self.output.open(&stream, config).await?;
        Ok((handle, stream.location, source.is_some()))
    }

    fn abort_play(&self) {
        self.output.abandon_focus();
        self.state.send_replace(PlaybackState::Stopped);
    }

    fn start_ramp(&self) -> VolumeRamp {
        VolumeRamp::start(
            self.settings,
            Arc::clone(&self.level),
            Arc::clone(&self.output),
        )
    }

    fn stop_current(&self, reason: EndReason) -> bool {
        let taken = lock(&self.session).take();
        match taken {
            Some(session) => {
                self.teardown(session, reason);
                true
            }
            None => false,
        }
    }

    fn end_session(&self, id: SessionId, reason: EndReason) -> bool {
        let taken = {
            let mut guard = lock(&self.session);
            match guard.as_ref() {
                Some(s) if s.id == id => guard.take(),
                _ => None,
            }
        };
        match taken {
            Some(session) => {
                self.teardown(session, reason);
                true
            }
            None => false,
        }
    }

    /// The single release path. Callers own `session`, so it runs once.
    fn teardown(&self, mut session: PlaySession, reason: EndReason) {
        if let Some(ramp) = session.ramp.take() {
            ramp.stop();
        }
        session.listener.cancel();
        session.handle.release();
        self.output.abandon_focus();
        self.level.send_replace(self.settings.initial);
        self.state.send_replace(PlaybackState::Stopped);
        info!(session = %session.id, ?reason, "alarm playback stopped");
        let _ = self.events.send(PlaybackEvent::Ended {
            session: session.id,
            reason,
        });
    }

    fn pause_session(&self, id: SessionId) {
        let mut guard = lock(&self.session);
        let Some(session) = guard.as_mut().filter(|s| s.id == id) else {
            return;
        };
        if self.state() != PlaybackState::Playing {
            return;
        }
        if let Some(ramp) = session.ramp.take() {
            ramp.stop();
        }
        session.handle.pause();
        self.state.send_replace(PlaybackState::Paused);
        debug!(session = %id, "playback paused");
    }

    fn resume_session(&self, id: SessionId) {
        let failed = {
            let mut guard = lock(&self.session);
            let Some(session) = guard.as_mut().filter(|s| s.id == id) else {
                return;
            };
            if self.state() != PlaybackState::Paused {
                return;
            }
            match session.handle.start() {
                Ok(()) => {
                    if session.ramp_enabled {
                        session.ramp = Some(self.start_ramp());
                    }
                    self.output.set_volume(self.volume());
                    self.state.send_replace(PlaybackState::Playing);
                    debug!(session = %id, level = self.volume(), "playback resumed");
                    None
                }
                Err(e) => Some(e),
            }
        };
        if let Some(e) = failed {
            warn!(session = %id, error = %e, "playback could not resume");
            self.end_session(id, EndReason::OutputError(e.to_string()));
        }
    }

    fn duck_session(&self, id: SessionId) {
        let guard = lock(&self.session);
        if !guard.as_ref().is_some_and(|s| s.id == id) {
            return;
        }
        let mut ducked = 0;
        self.level.send_modify(|level| {
            *level /= 2;
            ducked = *level;
        });
        self.output.set_volume(ducked);
        debug!(session = %id, level = ducked, "playback ducked");
    }
}

/// Reacts to arbitration events for one session until it ends.
async fn listen(
    controller: Weak<PlaybackController>,
    id: SessionId,
    mut events: broadcast::Receiver<OutputEvent>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => event,
        };
        let event = match event {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "output event receiver lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(controller) = controller.upgrade() else {
            break;
        };
        match event {
            OutputEvent::FocusLoss => {
                controller.end_session(id, EndReason::FocusLost);
                break;
            }
            OutputEvent::FocusLossTransient => controller.pause_session(id),
            OutputEvent::FocusLossTransientCanDuck => controller.duck_session(id),
            OutputEvent::FocusGain => controller.resume_session(id),
            OutputEvent::PlaybackError(msg) => {
                warn!(session = %id, error = %msg, "output reported a playback error");
                controller.end_session(id, EndReason::OutputError(msg));
                break;
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
