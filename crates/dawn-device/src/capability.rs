use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    error::Result,
    types::{DeviceEvent, DiscoveredDevice},
};

/// The platform's short-range radio, as seen by the connection manager.
///
/// Outcomes of `connect`, `start_discovery` and link loss are not return
/// values; they arrive in order on the [`DeviceEvent`] stream from
/// [`DeviceCapability::subscribe`]. Callers subscribe *before* issuing the
/// command so no event is missed.
#[async_trait]
pub trait DeviceCapability: Send + Sync {
    /// Whether the radio is switched on.
    fn is_enabled(&self) -> bool;

    /// Whether this process may scan and connect.
    fn has_authorization(&self) -> bool;

    async fn start_discovery(&self) -> Result<()>;

    async fn stop_discovery(&self) -> Result<()>;

    /// Peers previously paired with this host, any class.
    async fn bonded_devices(&self) -> Result<Vec<DiscoveredDevice>>;

    /// Begin connecting to `address`. Completion is reported as
    /// [`DeviceEvent::Connected`] or [`DeviceEvent::ConnectFailed`].
    async fn connect(&self, address: &str) -> Result<()>;

    async fn disconnect(&self, address: &str) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;
}
