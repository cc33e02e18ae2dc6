use async_trait::async_trait;
use dawn_core::AudioSourceRef;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

/// Usage class a stream is rendered under.
///
/// `Alarm` is exempt from do-not-disturb style muting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioUsage {
    Alarm,
    Media,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub looping: bool,
    pub usage: AudioUsage,
}

impl StreamConfig {
    pub fn alarm() -> Self {
        Self {
            looping: true,
            usage: AudioUsage::Alarm,
        }
    }
}

/// A resolved, openable audio source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayableStream {
    /// Whatever the output understands: a path, URI or asset key.
    pub location: String,
    /// `true` for the platform default alarm sound.
    pub is_default: bool,
}

impl PlayableStream {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            is_default: false,
        }
    }

    pub fn default_sound(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            is_default: true,
        }
    }
}

/// Platform arbitration of the audio-output resource, plus stream errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// Another requester took the resource for good.
    FocusLoss,
    FocusLossTransient,
    /// Transient loss where quieter playback may continue.
    FocusLossTransientCanDuck,
    FocusGain,
    /// The playing stream failed and cannot continue.
    PlaybackError(String),
}

/// The process-wide audio output. Only the playback controller touches it.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Ask for exclusive use of the output. `false` means denied.
    fn request_focus(&self, usage: AudioUsage) -> bool;

    fn abandon_focus(&self);

    /// Arbitration and error events, in order.
    fn subscribe(&self) -> broadcast::Receiver<OutputEvent>;

    /// Prepare `stream`; resolves once it is ready to start.
    async fn open(
        &self,
        stream: &PlayableStream,
        config: StreamConfig,
    ) -> Result<Box<dyn PlaybackHandle>>;

    /// Output level in percent, 0–100.
    fn set_volume(&self, percent: u8);
}

/// A prepared stream owned by one play session.
pub trait PlaybackHandle: Send {
    fn start(&mut self) -> Result<()>;
    fn pause(&mut self);
    /// Free the stream. Called exactly once, on teardown.
    fn release(&mut self);
}

/// Turns a stored source reference into something the output can open.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, source: &AudioSourceRef) -> Result<PlayableStream>;

    /// The platform default alarm sound.
    async fn resolve_default(&self) -> Result<PlayableStream>;
}
