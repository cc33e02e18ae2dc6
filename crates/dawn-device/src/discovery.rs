use std::sync::{atomic::Ordering, Arc};

use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    manager::{lock, DeviceConnectionManager},
    types::{ConnectionState, DiscoveredDevice, DiscoveryUpdate},
};

/// The discovery pass currently in progress.
pub(crate) struct DiscoverySession {
    id: u64,
    token: CancellationToken,
}

impl DeviceConnectionManager {
    /// Begin a discovery pass and subscribe to its updates.
    ///
    /// Fails when the radio is off or unauthorized. A pass already running is
    /// restarted. The pass ends on [`stop_discovery`](Self::stop_discovery),
    /// when the platform reports the end, or after the scan duration.
    pub async fn start_discovery(
        self: &Arc<Self>,
    ) -> Result<broadcast::Receiver<DiscoveryUpdate>> {
        self.ensure_available()?;
        if self.end_discovery(None) {
            debug!("restarting discovery pass");
        }

        let updates = self.discovery_tx.subscribe();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        *lock(&self.discovery) = Some(DiscoverySession {
            id,
            token: token.clone(),
        });

        if let Err(e) = self.capability.start_discovery().await {
            self.end_discovery(Some(id));
            return Err(e);
        }

        let manager = Arc::downgrade(self);
        let scan_duration = self.scan_duration;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(scan_duration) => {
                    if let Some(m) = manager.upgrade() {
                        if m.end_discovery(Some(id)) {
                            debug!("discovery pass timed out");
                            m.stop_capability_discovery().await;
                        }
                    }
                }
            }
        });

        info!(scan_secs = scan_duration.as_secs(), "discovery started");
        Ok(updates)
    }

    /// End the current pass. A no-op when nothing is scanning.
    pub async fn stop_discovery(&self) {
        if self.end_discovery(None) {
            self.stop_capability_discovery().await;
            info!("discovery stopped");
        }
    }

    pub fn is_discovering(&self) -> bool {
        lock(&self.discovery).is_some()
    }

    /// Audio devices seen in the current pass, ordered by address.
    pub fn discovered(&self) -> Vec<DiscoveredDevice> {
        let mut devices: Vec<DiscoveredDevice> =
            self.discovered.iter().map(|e| e.value().clone()).collect();
        devices.sort_by(|a, b| a.address.cmp(&b.address));
        devices
    }

    /// Audio-class devices already paired with this host.
    pub async fn bonded_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        self.ensure_available()?;
        let linked = (self.state() == ConnectionState::Connected)
            .then(|| self.target())
            .flatten();

        let devices = self
            .capability
            .bonded_devices()
            .await?
            .into_iter()
            .filter(|d| d.class.is_audio())
            .map(|mut d| {
                if linked.as_deref() == Some(d.address.as_str()) {
                    d.connection_state = ConnectionState::Connected;
                }
                d
            })
            .collect();
        Ok(devices)
    }

    /// Close the pass (all passes when `only` is `None`). Returns whether one was open.
    pub(crate) fn end_discovery(&self, only: Option<u64>) -> bool {
        let mut guard = lock(&self.discovery);
        let matches = guard
            .as_ref()
            .is_some_and(|s| only.map_or(true, |id| s.id == id));
        if !matches {
            return false;
        }
        if let Some(session) = guard.take() {
            session.token.cancel();
        }
        self.discovered.clear();
        let _ = self.discovery_tx.send(DiscoveryUpdate::Finished);
        true
    }

    pub(crate) fn record_discovered(&self, device: DiscoveredDevice) {
        if !self.is_discovering() {
            return;
        }
        if !device.class.is_audio() {
            debug!(address = %device.address, class = ?device.class, "non-audio device ignored");
            return;
        }

        match self.discovered.entry(device.address.clone()) {
            Entry::Occupied(mut seen) => {
                let known = seen.get_mut();
                known.rssi = device.rssi.or(known.rssi);
                if !device.name.trim().is_empty() {
                    known.name = device.name;
                }
            }
            Entry::Vacant(slot) => {
                debug!(address = %device.address, name = %device.label(), "audio device found");
                slot.insert(device.clone());
                let _ = self.discovery_tx.send(DiscoveryUpdate::Found(device));
            }
        }
    }

    async fn stop_capability_discovery(&self) {
        if let Err(e) = self.capability.stop_discovery().await {
            warn!(error = %e, code = e.code(), "failed to stop discovery");
        }
    }
}
