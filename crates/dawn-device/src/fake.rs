//! Scriptable in-memory radio used by the unit tests.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    capability::DeviceCapability,
    error::Result,
    types::{DeviceEvent, DiscoveredDevice},
};

/// How the fake answers the next `connect`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    Link,
    Refuse,
    /// Never answer, so the attempt times out.
    Silence,
}

pub(crate) struct FakeRadio {
    enabled: AtomicBool,
    authorized: AtomicBool,
    replies: Mutex<VecDeque<Reply>>,
    bonded: Mutex<Vec<DiscoveredDevice>>,
    connects: AtomicU32,
    disconnects: AtomicU32,
    discovery_stops: AtomicU32,
    events: broadcast::Sender<DeviceEvent>,
}

impl FakeRadio {
    pub(crate) fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            authorized: AtomicBool::new(true),
            replies: Mutex::new(VecDeque::new()),
            bonded: Mutex::new(Vec::new()),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            discovery_stops: AtomicU32::new(0),
            events,
        })
    }

    pub(crate) fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.replies.lock().unwrap().extend(replies);
    }

    pub(crate) fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::SeqCst);
    }

    pub(crate) fn set_authorized(&self, ok: bool) {
        self.authorized.store(ok, Ordering::SeqCst);
    }

    pub(crate) fn set_bonded(&self, devices: Vec<DiscoveredDevice>) {
        *self.bonded.lock().unwrap() = devices;
    }

    pub(crate) fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn connect_calls(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnect_calls(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn discovery_stops(&self) -> u32 {
        self.discovery_stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceCapability for FakeRadio {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn has_authorization(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    async fn start_discovery(&self) -> Result<()> {
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<()> {
        self.discovery_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        Ok(self.bonded.lock().unwrap().clone())
    }

    async fn connect(&self, address: &str) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Silence);
        match reply {
            Reply::Link => self.emit(DeviceEvent::Connected {
                address: address.to_string(),
            }),
            Reply::Refuse => self.emit(DeviceEvent::ConnectFailed {
                address: address.to_string(),
                reason: "peer refused".to_string(),
            }),
            Reply::Silence => {}
        }
        Ok(())
    }

    async fn disconnect(&self, _address: &str) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}
