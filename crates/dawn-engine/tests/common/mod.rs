//! Wiring of the whole engine over in-memory platform fakes.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use dawn_core::{AudioSourceRef, DawnConfig, LocalZone, TimeSource};
use dawn_device::{DeviceCapability, DeviceConnectionManager, DeviceEvent, DiscoveredDevice};
use dawn_engine::{
    AlarmEvent, AlarmOrchestrator, AlarmService, OrchestratorSettings, TaskDispatcher,
};
use dawn_playback::{
    AudioOutput, AudioUsage, OutputEvent, PlayableStream, PlaybackController, PlaybackError,
    PlaybackHandle, RampSettings, SourceResolver, StreamConfig,
};
use dawn_scheduler::{AlarmScheduler, ArmingLedger, SqliteAlarmStore, TokioTaskQueue};
use rusqlite::Connection;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

pub const SPEAKER: &str = "00:1A:7D:DA:71:13";
pub const DEFAULT_SOUND: &str = "default-alarm.ogg";

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// UTC wall clock driven by tokio's (paused) timer, so queue delays and
/// "now" agree.
pub struct TokioClock {
    base: DateTime<Utc>,
    origin: Instant,
}

impl TokioClock {
    pub fn starting_at(base: NaiveDateTime) -> Self {
        Self {
            base: base.and_utc(),
            origin: Instant::now(),
        }
    }
}

impl TimeSource for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::from_std(self.origin.elapsed()).unwrap()
    }

    fn zone(&self) -> &dyn LocalZone {
        &Utc
    }
}

pub fn morning(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .unwrap()
        .and_time(NaiveTime::from_hms_opt(h, m, s).unwrap())
}

// ---------------------------------------------------------------------------
// Radio
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Link,
    Silence,
}

pub struct TestRadio {
    reply: Mutex<Reply>,
    connects: AtomicU32,
    disconnects: AtomicU32,
    events: broadcast::Sender<DeviceEvent>,
}

impl TestRadio {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            reply: Mutex::new(Reply::Link),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            events,
        })
    }

    pub fn answer_with(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn connect_calls(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceCapability for TestRadio {
    fn is_enabled(&self) -> bool {
        true
    }

    fn has_authorization(&self) -> bool {
        true
    }

    async fn start_discovery(&self) -> dawn_device::Result<()> {
        Ok(())
    }

    async fn stop_discovery(&self) -> dawn_device::Result<()> {
        Ok(())
    }

    async fn bonded_devices(&self) -> dawn_device::Result<Vec<DiscoveredDevice>> {
        Ok(Vec::new())
    }

    async fn connect(&self, address: &str) -> dawn_device::Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if *self.reply.lock().unwrap() == Reply::Link {
            let _ = self.events.send(DeviceEvent::Connected {
                address: address.to_string(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self, _address: &str) -> dawn_device::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

pub struct TestOutput {
    events: broadcast::Sender<OutputEvent>,
    denials_left: AtomicU32,
    opened: Mutex<Vec<String>>,
    starts: Arc<AtomicU32>,
    abandoned: AtomicU32,
}

impl TestOutput {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            events,
            denials_left: AtomicU32::new(0),
            opened: Mutex::new(Vec::new()),
            starts: Arc::new(AtomicU32::new(0)),
            abandoned: AtomicU32::new(0),
        })
    }

    pub fn deny_focus(&self, times: u32) {
        self.denials_left.store(times, Ordering::SeqCst);
    }

    pub fn emit(&self, event: OutputEvent) {
        let _ = self.events.send(event);
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn focus_abandoned(&self) -> u32 {
        self.abandoned.load(Ordering::SeqCst)
    }
}

struct TestHandle {
    starts: Arc<AtomicU32>,
}

impl PlaybackHandle for TestHandle {
    fn start(&mut self) -> dawn_playback::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) {}

    fn release(&mut self) {}
}

#[async_trait]
impl AudioOutput for TestOutput {
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
        _config: StreamConfig,
    ) -> dawn_playback::Result<Box<dyn PlaybackHandle>> {
        self.opened.lock().unwrap().push(stream.location.clone());
        Ok(Box::new(TestHandle {
            starts: Arc::clone(&self.starts),
        }))
    }

    fn set_volume(&self, _percent: u8) {}
}

pub struct TestResolver {
    known: HashSet<String>,
    default_broken: AtomicBool,
}

impl TestResolver {
    fn new(known: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            known: known.iter().map(|s| s.to_string()).collect(),
            default_broken: AtomicBool::new(false),
        })
    }

    pub fn break_default(&self) {
        self.default_broken.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceResolver for TestResolver {
    async fn resolve(&self, source: &AudioSourceRef) -> dawn_playback::Result<PlayableStream> {
        if self.known.contains(source.as_str()) {
            Ok(PlayableStream::new(source.as_str()))
        } else {
            Err(PlaybackError::SourceResolution(format!("{source} not found")))
        }
    }

    async fn resolve_default(&self) -> dawn_playback::Result<PlayableStream> {
        if self.default_broken.load(Ordering::SeqCst) {
            return Err(PlaybackError::SourceResolution("no default sound".into()));
        }
        Ok(PlayableStream::default_sound(DEFAULT_SOUND))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub clock: Arc<TokioClock>,
    pub store: Arc<SqliteAlarmStore>,
    pub scheduler: Arc<AlarmScheduler>,
    pub device: Arc<DeviceConnectionManager>,
    pub playback: Arc<PlaybackController>,
    pub orchestrator: AlarmOrchestrator,
    pub service: AlarmService,
    pub radio: Arc<TestRadio>,
    pub output: Arc<TestOutput>,
    pub resolver: Arc<TestResolver>,
    events: broadcast::Receiver<AlarmEvent>,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    /// Wire everything at 06:00 with `known_sources` resolvable.
    pub fn start(config: DawnConfig, known_sources: &[&str]) -> Self {
        let clock = Arc::new(TokioClock::starting_at(morning(6, 0, 0)));
        let store = Arc::new(SqliteAlarmStore::new(Connection::open_in_memory().unwrap()).unwrap());

        let (due_tx, due_rx) = mpsc::channel(16);
        let ledger = Arc::new(ArmingLedger::new());
        let scheduler = Arc::new(AlarmScheduler::new(
            Arc::new(TokioTaskQueue::new(due_tx)),
            clock.clone(),
            Arc::clone(&ledger),
            config.scheduler.preconnect_lead(),
        ));

        let radio = TestRadio::new();
        let device = DeviceConnectionManager::new(radio.clone(), &config.device);

        let output = TestOutput::new();
        let resolver = TestResolver::new(known_sources);
        let playback = PlaybackController::new(
            output.clone(),
            resolver.clone(),
            RampSettings::from_config(&config.playback),
        );

        let orchestrator = AlarmOrchestrator::new(
            Arc::clone(&playback),
            Arc::clone(&device),
            ledger,
            clock.clone(),
            OrchestratorSettings::from_config(&config),
        );
        let events = orchestrator.subscribe();
        let service = AlarmService::new(store.clone(), Arc::clone(&scheduler), orchestrator.clone());

        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = TaskDispatcher::new(
            orchestrator.clone(),
            Arc::clone(&scheduler),
            Arc::clone(&device),
            config.alarm.rearm_after_fire,
        );
        tokio::spawn(dispatcher.run(due_rx, shutdown_rx));

        Self {
            clock,
            store,
            scheduler,
            device,
            playback,
            orchestrator,
            service,
            radio,
            output,
            resolver,
            events,
            shutdown,
        }
    }

    /// Let (paused) time run until `at`, then until every task is idle again.
    pub async fn run_until(&self, at: NaiveDateTime) {
        let now = self.clock.local_now();
        if at > now {
            tokio::time::sleep((at - now).to_std().unwrap()).await;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    /// Events published since the last call.
    pub fn take_events(&mut self) -> Vec<AlarmEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn shut_down(&self) {
        let _ = self.shutdown.send(true);
    }
}
