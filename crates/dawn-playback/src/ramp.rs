use std::sync::Arc;
use std::time::Duration;

use dawn_core::config::PlaybackConfig;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::output::AudioOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampSettings {
    pub initial: u8,
    pub max: u8,
    pub increment: u8,
    pub interval: Duration,
}

impl Default for RampSettings {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

impl RampSettings {
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            initial: config.initial_volume,
            max: config.max_volume,
            increment: config.volume_increment,
            interval: config.ramp_interval(),
        }
    }

    /// Ticks needed to climb from `initial` to `max`.
    pub fn ticks_to_max(&self) -> u32 {
        let span = self.max.saturating_sub(self.initial) as u32;
        let step = self.increment.max(1) as u32;
        span.div_ceil(step)
    }
}

/// One ramp step: `current + increment`, capped at `max`.
pub fn next_level(current: u8, increment: u8, max: u8) -> u8 {
    current.saturating_add(increment).min(max).max(current)
}

/// Periodic volume escalation bound to one play session.
///
/// Each tick raises the shared level by one increment until `max`. Stopping is
/// idempotent; once [`VolumeRamp::stop`] returns, the level is never raised
/// again by this ramp. Dropping the ramp stops it.
pub struct VolumeRamp {
    token: CancellationToken,
    level: Arc<watch::Sender<u8>>,
    task: JoinHandle<()>,
}

impl VolumeRamp {
    /// Start ticking from whatever level is current. First tick after one interval.
    pub fn start(
        settings: RampSettings,
        level: Arc<watch::Sender<u8>>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        let token = CancellationToken::new();
        let task = tokio::spawn(run(settings, Arc::clone(&level), output, token.clone()));
        Self { token, level, task }
    }

    pub fn stop(&self) {
        // Cancel under the level lock so an in-flight tick either lands first
        // or sees the cancellation.
        self.level.send_if_modified(|_| {
            self.token.cancel();
            false
        });
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }
}

impl Drop for VolumeRamp {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    settings: RampSettings,
    level: Arc<watch::Sender<u8>>,
    output: Arc<dyn AudioOutput>,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let mut raised = None;
                // The output is set under the level lock too, so nothing
                // reaches it once `stop` has returned.
                level.send_if_modified(|current| {
                    if token.is_cancelled() || *current >= settings.max {
                        return false;
                    }
                    *current = next_level(*current, settings.increment, settings.max);
                    output.set_volume(*current);
                    raised = Some(*current);
                    true
                });
                match raised {
                    Some(percent) => {
                        if percent >= settings.max {
                            debug!(percent, "volume ramp reached max");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
}
