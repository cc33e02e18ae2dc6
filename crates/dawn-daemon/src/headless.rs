//! Platform adapters for hosts without a radio or a mixer: pre-connect is
//! skipped and "playback" is a log line per focus and volume change.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dawn_core::AudioSourceRef;
use dawn_device::{DeviceCapability, DeviceError, DeviceEvent, DiscoveredDevice};
use dawn_playback::{
    AudioOutput, AudioUsage, OutputEvent, PlayableStream, PlaybackError, PlaybackHandle,
    SourceResolver, StreamConfig,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Radio
// ---------------------------------------------------------------------------

/// A host with no short-range radio. Reports itself switched off.
pub struct HeadlessRadio {
    events: broadcast::Sender<DeviceEvent>,
}

impl HeadlessRadio {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }
}

#[async_trait]
impl DeviceCapability for HeadlessRadio {
    fn is_enabled(&self) -> bool {
        false
    }

    fn has_authorization(&self) -> bool {
        true
    }

    async fn start_discovery(&self) -> dawn_device::Result<()> {
        Err(DeviceError::Unavailable)
    }

    async fn stop_discovery(&self) -> dawn_device::Result<()> {
        Ok(())
    }

    async fn bonded_devices(&self) -> dawn_device::Result<Vec<DiscoveredDevice>> {
        Ok(Vec::new())
    }

    async fn connect(&self, _address: &str) -> dawn_device::Result<()> {
        Err(DeviceError::Unavailable)
    }

    async fn disconnect(&self, _address: &str) -> dawn_device::Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Treats every source reference as a path on the local filesystem.
pub struct FileSourceResolver {
    default_sound: PathBuf,
}

impl FileSourceResolver {
    pub fn new(default_sound: impl Into<PathBuf>) -> Self {
        Self {
            default_sound: default_sound.into(),
        }
    }
}

async fn existing_file(path: &Path) -> dawn_playback::Result<String> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(path.display().to_string()),
        Ok(_) => Err(PlaybackError::SourceResolution(format!(
            "{} is not a file",
            path.display()
        ))),
        Err(e) => Err(PlaybackError::SourceResolution(format!(
            "{}: {e}",
            path.display()
        ))),
    }
}

#[async_trait]
impl SourceResolver for FileSourceResolver {
    async fn resolve(&self, source: &AudioSourceRef) -> dawn_playback::Result<PlayableStream> {
        let location = existing_file(Path::new(source.as_str())).await?;
        Ok(PlayableStream::new(location))
    }

    async fn resolve_default(&self) -> dawn_playback::Result<PlayableStream> {
        let location = existing_file(&self.default_sound).await?;
        Ok(PlayableStream::default_sound(location))
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Output that grants focus to everyone and writes what it would do to the log.
pub struct LogAudioOutput {
    events: broadcast::Sender<OutputEvent>,
}

impl LogAudioOutput {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(8);
        Self { events }
    }
}

struct LogHandle {
    location: String,
}

impl PlaybackHandle for LogHandle {
    fn start(&mut self) -> dawn_playback::Result<()> {
        info!(location = %self.location, "stream started");
        Ok(())
    }

    fn pause(&mut self) {
        info!(location = %self.location, "stream paused");
    }

    fn release(&mut self) {
        info!(location = %self.location, "stream released");
    }
}

#[async_trait]
impl AudioOutput for LogAudioOutput {
    fn request_focus(&self, usage: AudioUsage) -> bool {
        info!(?usage, "audio focus granted");
        true
    }

    fn abandon_focus(&self) {
        info!("audio focus abandoned");
    }

    fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.events.subscribe()
    }

    async fn open(
        &self,
        stream: &PlayableStream,
        config: StreamConfig,
    ) -> dawn_playback::Result<Box<dyn PlaybackHandle>> {
        info!(location = %stream.location, default = stream.is_default, looping = config.looping, "stream opened");
        Ok(Box::new(LogHandle {
            location: stream.location.clone(),
        }))
    }

    fn set_volume(&self, percent: u8) {
        debug!(percent, "volume");
    }
}
