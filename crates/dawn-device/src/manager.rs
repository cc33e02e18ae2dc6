use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, Weak,
};
use std::time::Duration;

use dashmap::DashMap;
use dawn_core::config::DeviceConfig;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    capability::DeviceCapability,
    discovery::DiscoverySession,
    error::{DeviceError, Result},
    retry::RetryPolicy,
    types::{ConnectionState, DeviceEvent, DiscoveredDevice, DiscoveryUpdate, PreconnectOutcome},
};

/// One connect session: a target address and the task driving it.
struct Session {
    id: u64,
    address: String,
    token: CancellationToken,
    outcome: watch::Receiver<Option<PreconnectOutcome>>,
}

/// Handle on a running (or finished) connect session.
pub struct ConnectionAttempt {
    address: String,
    outcome: watch::Receiver<Option<PreconnectOutcome>>,
}

impl ConnectionAttempt {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Wait for the session to settle.
    pub async fn outcome(mut self) -> PreconnectOutcome {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone().unwrap_or(PreconnectOutcome::Cancelled),
            Err(_) => PreconnectOutcome::Cancelled,
        }
    }
}

/// Owns the connection to one short-range audio device at a time.
///
/// `connect` never blocks the caller: attempts run on a spawned task, each
/// time-boxed by the connection timeout, retried per [`RetryPolicy`]. State
/// changes are published on a `watch` channel. Failures are logged and
/// absorbed, never raised to the alarm path.
pub struct DeviceConnectionManager {
    pub(crate) capability: Arc<dyn DeviceCapability>,
    policy: RetryPolicy,
    connection_timeout: Duration,
    pub(crate) scan_duration: Duration,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    session: Mutex<Option<Session>>,
    pub(crate) next_id: AtomicU64,
    pub(crate) discovery: Mutex<Option<DiscoverySession>>,
    pub(crate) discovered: DashMap<String, DiscoveredDevice>,
    pub(crate) discovery_tx: broadcast::Sender<DiscoveryUpdate>,
}

impl DeviceConnectionManager {
    /// Build the manager and start listening to the capability's events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(capability: Arc<dyn DeviceCapability>, config: &DeviceConfig) -> Arc<Self> {
        let events = capability.subscribe();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (discovery_tx, _) = broadcast::channel(64);
        let manager = Arc::new(Self {
            capability,
            policy: RetryPolicy::from_config(config),
            connection_timeout: config.connection_timeout(),
            scan_duration: config.scan_duration(),
            state,
            attempts: AtomicU32::new(0),
            session: Mutex::new(None),
            next_id: AtomicU64::new(0),
            discovery: Mutex::new(None),
            discovered: DashMap::new(),
            discovery_tx,
        });
        tokio::spawn(monitor(Arc::downgrade(&manager), events));
        manager
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// State changes as a `Stream`, starting with the current value.
    pub fn state_stream(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.state.subscribe())
    }

    /// Attempts made by the current (or last) session.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn target(&self) -> Option<String> {
        lock(&self.session).as_ref().map(|s| s.address.clone())
    }

    /// `true` while a session for `address` is still working through attempts.
    pub fn is_connecting_to(&self, address: &str) -> bool {
        lock(&self.session)
            .as_ref()
            .is_some_and(|s| s.address == address && s.outcome.borrow().is_none())
    }

    /// Wait up to `grace` for the link to come up. Returns whether it did.
    pub async fn wait_connected(&self, grace: Duration) -> bool {
        let mut rx = self.state.subscribe();
        tokio::time::timeout(grace, rx.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    /// Start (or join) a connect session for `address`.
    ///
    /// A session already running for the same address, or one that ended
    /// connected, is joined rather than restarted. A different address tears
    /// the old session down first and resets the state to `Disconnected`.
    pub fn connect(self: &Arc<Self>, address: &str) -> ConnectionAttempt {
        let mut guard = lock(&self.session);
        if let Some(current) = guard.as_ref() {
            let running = current.outcome.borrow().is_none();
            let linked = *self.state.borrow() == ConnectionState::Connected;
            if current.address == address && (running || linked) {
                debug!(address, "joining existing connection session");
                return ConnectionAttempt {
                    address: address.to_string(),
                    outcome: current.outcome.clone(),
                };
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let previous = guard.replace(Session {
            id,
            address: address.to_string(),
            token: token.clone(),
            outcome: outcome_rx.clone(),
        });
        let stale_link = previous.and_then(|prev| {
            prev.token.cancel();
            (prev.address != address).then_some(prev.address)
        });
        self.attempts.store(0, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Disconnected);
        drop(guard);

        let manager = Arc::clone(self);
        let target = address.to_string();
        tokio::spawn(async move {
            let outcome = manager.run_session(id, target, token, stale_link).await;
            let _ = outcome_tx.send(Some(outcome));
        });

        ConnectionAttempt {
            address: address.to_string(),
            outcome: outcome_rx,
        }
    }

    /// Best-effort pre-connect: always completes, never fails the caller.
    pub async fn preconnect(self: &Arc<Self>, address: &str) -> PreconnectOutcome {
        if address.trim().is_empty() {
            return PreconnectOutcome::Skipped {
                reason: "no device address".to_string(),
            };
        }
        if let Err(e) = self.ensure_available() {
            warn!(address, error = %e, code = e.code(), "pre-connect skipped");
            return PreconnectOutcome::Skipped {
                reason: e.to_string(),
            };
        }

        let outcome = self.connect(address).outcome().await;
        match &outcome {
            PreconnectOutcome::Connected { attempts } => {
                info!(address, attempts, "pre-connect succeeded")
            }
            PreconnectOutcome::GaveUp { attempts } => {
                warn!(address, attempts, "pre-connect gave up; alarm will use the default output")
            }
            other => debug!(address, outcome = ?other, "pre-connect ended"),
        }
        outcome
    }

    /// Tear down the current session and drop the link. Idempotent.
    pub async fn disconnect(&self) {
        let session = {
            let mut guard = lock(&self.session);
            let session = guard.take();
            self.state.send_replace(ConnectionState::Disconnected);
            session
        };
        let Some(session) = session else {
            return;
        };

        session.token.cancel();
        if let Err(e) = self.capability.disconnect(&session.address).await {
            warn!(address = %session.address, error = %e, "device disconnect failed");
        }
        info!(address = %session.address, "device disconnected");
    }

    pub(crate) fn ensure_available(&self) -> Result<()> {
        if !self.capability.is_enabled() {
            return Err(DeviceError::Unavailable);
        }
        if !self.capability.has_authorization() {
            return Err(DeviceError::Unauthorized);
        }
        Ok(())
    }

    /// Publish `state` only if session `id` is still the current one.
    fn set_state(&self, id: u64, state: ConnectionState) -> bool {
        let guard = lock(&self.session);
        match guard.as_ref() {
            Some(s) if s.id == id => {
                self.state.send_replace(state);
                true
            }
            _ => false,
        }
    }

    async fn run_session(
        &self,
        id: u64,
        address: String,
        token: CancellationToken,
        stale_link: Option<String>,
    ) -> PreconnectOutcome {
        if let Some(old) = stale_link {
            if let Err(e) = self.capability.disconnect(&old).await {
                warn!(address = %old, error = %e, "failed to drop previous device");
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(delay) = self.policy.delay_before(attempt) {
                if !self.set_state(id, ConnectionState::Reconnecting) {
                    return PreconnectOutcome::Cancelled;
                }
                tokio::select! {
                    _ = token.cancelled() => return PreconnectOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if !self.set_state(id, ConnectionState::Connecting) {
                return PreconnectOutcome::Cancelled;
            }
            self.attempts.store(attempt, Ordering::SeqCst);
            debug!(%address, attempt, "connecting to device");

            let result = tokio::select! {
                _ = token.cancelled() => return PreconnectOutcome::Cancelled,
                r = self.attempt_once(&address) => r,
            };

            match result {
                Ok(()) => {
                    if !self.set_state(id, ConnectionState::Connected) {
                        return PreconnectOutcome::Cancelled;
                    }
                    info!(%address, attempt, "device connected");
                    return PreconnectOutcome::Connected { attempts: attempt };
                }
                Err(e) => {
                    warn!(%address, attempt, error = %e, code = e.code(), "connection attempt failed");
                    if !self.set_state(id, ConnectionState::Failed) {
                        return PreconnectOutcome::Cancelled;
                    }
                    if self.policy.is_exhausted(attempt) {
                        return PreconnectOutcome::GaveUp { attempts: attempt };
                    }
                }
            }
        }
    }

    /// One time-boxed attempt: issue the connect, wait for its outcome event.
    async fn attempt_once(&self, address: &str) -> Result<()> {
        let mut events = self.capability.subscribe();
        tokio::time::timeout(
            self.connection_timeout,
            self.connect_and_wait(&mut events, address),
        )
        .await
        .map_err(|_| DeviceError::ConnectionTimeout {
            ms: self.connection_timeout.as_millis() as u64,
        })?
    }

    async fn connect_and_wait(
        &self,
        events: &mut broadcast::Receiver<DeviceEvent>,
        address: &str,
    ) -> Result<()> {
        self.capability.connect(address).await?;
        wait_for_link(events, address).await
    }

    fn handle_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Found(device) => self.record_discovered(device),
            DeviceEvent::DiscoveryFinished => {
                self.end_discovery(None);
            }
            DeviceEvent::Disconnected { address } => {
                let guard = lock(&self.session);
                let ours = guard.as_ref().is_some_and(|s| s.address == address);
                if ours && *self.state.borrow() == ConnectionState::Connected {
                    self.state.send_replace(ConnectionState::Disconnected);
                    warn!(%address, "device link lost");
                }
            }
            DeviceEvent::Connected { .. } | DeviceEvent::ConnectFailed { .. } => {}
        }
    }
}

async fn wait_for_link(
    events: &mut broadcast::Receiver<DeviceEvent>,
    address: &str,
) -> Result<()> {
    loop {
        match events.recv().await {
            Ok(DeviceEvent::Connected { address: a }) if a == address => return Ok(()),
            Ok(DeviceEvent::ConnectFailed { address: a, reason }) if a == address => {
                return Err(DeviceError::ConnectFailed(reason))
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!(skipped = n, "device event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(DeviceError::ConnectFailed(
                    "device event stream closed".to_string(),
                ))
            }
        }
    }
}

/// Feeds capability events into the manager for as long as it is alive.
async fn monitor(manager: Weak<DeviceConnectionManager>, mut events: broadcast::Receiver<DeviceEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match manager.upgrade() {
                Some(m) => m.handle_event(event),
                None => break,
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "device monitor lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
