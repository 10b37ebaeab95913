//! Platform radio boundary
//! The watcher only talks to the Bluetooth stack through these traits.

use tokio::sync::mpsc;

use crate::core::bluetooth::types::{
    DeviceAddress, DeviceMetadata, ListenerStatus, RawAdvertisement, ScanMode,
};
use crate::error::Result;

/// Events pushed by the platform listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Advertisement(RawAdvertisement),
    /// The listener halted without being asked to
    ListenerStopped,
}

pub type RadioSink = mpsc::UnboundedSender<RadioEvent>;

/// Source of raw advertisements (the platform advertisement watcher).
#[async_trait::async_trait]
pub trait AdvertisementSource: Send + Sync {
    async fn set_scan_mode(&self, mode: ScanMode) -> Result<()>;

    /// Starts listening; every received broadcast is pushed into `sink`.
    async fn start(&self, sink: RadioSink) -> Result<()>;

    /// Stops listening. Must not push `ListenerStopped` for a requested stop.
    async fn stop(&self) -> Result<()>;

    async fn status(&self) -> ListenerStatus;
}

/// Secondary lookup of connection/pairing details, keyed by address.
#[async_trait::async_trait]
pub trait DeviceResolver: Send + Sync {
    /// Returns None when the platform does not know the device.
    async fn resolve(&self, address: DeviceAddress) -> Option<DeviceMetadata>;
}
