use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection state of the single device session a manager owns.
///
/// ```text
/// Disconnected ──► Connecting ──► Connected ──(loss)──► Disconnected
///                     ▲   │
///                     │   ▼
///             Reconnecting ◄── Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Major class a peer advertises. Only audio/video peers are surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    AudioVideo,
    Phone,
    Computer,
    Peripheral,
    Other,
}

impl DeviceClass {
    pub fn is_audio(self) -> bool {
        matches!(self, DeviceClass::AudioVideo)
    }
}

/// A peer seen during discovery or listed among bonded devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Hardware address, unique key within a discovery pass.
    pub address: String,
    pub name: String,
    pub rssi: Option<i16>,
    pub class: DeviceClass,
    pub connection_state: ConnectionState,
}

impl DiscoveredDevice {
    pub fn new(address: impl Into<String>, name: impl Into<String>, class: DeviceClass) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            rssi: None,
            class,
            connection_state: ConnectionState::Disconnected,
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Display name, or "Unknown Device" when the peer sent none.
    pub fn label(&self) -> &str {
        if self.name.trim().is_empty() {
            "Unknown Device"
        } else {
            &self.name
        }
    }
}

/// Ordered events emitted by a [`DeviceCapability`](crate::DeviceCapability).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Found(DiscoveredDevice),
    /// The platform ended the current discovery pass.
    DiscoveryFinished,
    Connected { address: String },
    ConnectFailed { address: String, reason: String },
    Disconnected { address: String },
}

/// What a discovery subscriber sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryUpdate {
    /// First sighting of an audio device in this pass.
    Found(DiscoveredDevice),
    Finished,
}

/// Result of the best-effort pre-connect flow. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconnectOutcome {
    Connected { attempts: u32 },
    /// Every attempt failed; the manager settled in `Failed`.
    GaveUp { attempts: u32 },
    /// The radio was off or unauthorized, or no address was given.
    Skipped { reason: String },
    /// The session was torn down (disconnect or new target) before it finished.
    Cancelled,
}

impl PreconnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, PreconnectOutcome::Connected { .. })
    }
}
