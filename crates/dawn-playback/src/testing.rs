//! In-memory output and resolver used by the unit tests.

use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use dawn_core::AudioSourceRef;
use tokio::sync::broadcast;

use crate::{
    error::{PlaybackError, Result},
    output::{AudioOutput, AudioUsage, OutputEvent, PlayableStream, PlaybackHandle, SourceResolver, StreamConfig},
};

#[derive(Default)]
struct Counters {
    starts: AtomicU32,
    releases: AtomicU32,
}

pub(crate) struct RecordingOutput {
    events: broadcast::Sender<OutputEvent>,
    volumes: Mutex<Vec<u8>>,
    opened: Mutex<Vec<(String, StreamConfig)>>,
    refuse_open: Mutex<HashSet<String>>,
    denials_left: AtomicU32,
    abandoned: AtomicU32,
    counters: Arc<Counters>,
}

impl RecordingOutput {
    pub(crate) fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            events,
            volumes: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            refuse_open: Mutex::new(HashSet::new()),
            denials_left: AtomicU32::new(0),
            abandoned: AtomicU32::new(0),
            counters: Arc::new(Counters::default()),
        })
    }

    pub(crate) fn deny_focus(&self, times: u32) {
        self.denials_left.store(times, Ordering::SeqCst);
    }

    pub(crate) fn refuse_open(&self, location: &str) {
        self.refuse_open.lock().unwrap().insert(location.to_string());
    }

    pub(crate) fn emit(&self, event: OutputEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn volumes(&self) -> Vec<u8> {
        self.volumes.lock().unwrap().clone()
    }

    pub(crate) fn opened(&self) -> Vec<(String, StreamConfig)> {
        self.opened.lock().unwrap().clone()
    }

    pub(crate) fn focus_abandoned(&self) -> u32 {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub(crate) fn starts(&self) -> u32 {
        self.counters.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn releases(&self) -> u32 {
        self.counters.releases.load(Ordering::SeqCst)
    }
}

struct RecordingHandle {
    counters: Arc<Counters>,
    released: AtomicBool,
}

impl PlaybackHandle for RecordingHandle {
    fn start(&mut self) -> Result<()> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) {}

    fn release(&mut self) {
        assert!(!self.released.swap(true, Ordering::SeqCst), "handle released twice");
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    fn request_focus(&self, _usage: AudioUsage) -> bool {
        self.denials_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }

    fn abandon_focus(&self) {
        self.abandoned.fetch_add(1, Ordering::SeqCst);
    }

    fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.events.subscribe()
    }

    async fn open(
        &self,
        stream: &PlayableStream,
        config: StreamConfig,
    ) -> Result<Box<dyn PlaybackHandle>> {
        if self.refuse_open.lock().unwrap().contains(&stream.location) {
            return Err(PlaybackError::Output(format!("cannot decode {}", stream.location)));
        }
        self.opened
            .lock()
            .unwrap()
            .push((stream.location.clone(), config));
        Ok(Box::new(RecordingHandle {
            counters: Arc::clone(&self.counters),
            released: AtomicBool::new(false),
        }))
    }

    fn set_volume(&self, percent: u8) {
        self.volumes.lock().unwrap().push(percent);
    }
}

/// Resolves only the locations it was built with.
pub(crate) struct FakeResolver {
    known: HashSet<String>,
    default_broken: AtomicBool,
}

impl FakeResolver {
    pub(crate) const DEFAULT: &'static str = "default-alarm.ogg";

    pub(crate) fn new<const N: usize>(known: [&str; N]) -> Arc<Self> {
        Arc::new(Self {
            known: known.iter().map(|s| s.to_string()).collect(),
            default_broken: AtomicBool::new(false),
        })
    }

    pub(crate) fn break_default(&self) {
        self.default_broken.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceResolver for FakeResolver {
    async fn resolve(&self, source: &AudioSourceRef) -> Result<PlayableStream> {
        if self.known.contains(source.as_str()) {
            Ok(PlayableStream::new(source.as_str()))
        } else {
            Err(PlaybackError::SourceResolution(format!("{source} not found")))
        }
    }

    async fn resolve_default(&self) -> Result<PlayableStream> {
        if self.default_broken.load(Ordering::SeqCst) {
            return Err(PlaybackError::SourceResolution("no default sound".into()));
        }
        Ok(PlayableStream::default_sound(Self::DEFAULT))
    }
}
