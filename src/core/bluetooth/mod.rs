//! Bluetooth functionality for the roster watcher
//! This module turns the platform advertisement stream into a live,
//! timeout-pruned roster of nearby devices and notifies observers.

pub mod constants;
mod events;
mod ingest;
mod radio;
mod roster;
mod scanner;
mod types;
mod watcher;

// Re-export types that should be publicly accessible
pub use events::{EventBus, EventChannel, SubscriptionId, WatcherEvent};
pub use ingest::{AdvertisementIngestor, Clock, system_clock};
pub use radio::{AdvertisementSource, DeviceResolver, RadioEvent, RadioSink};
pub use roster::{HeartbeatTimeout, IngestOutcome, RosterSnapshot, RosterStore};
pub use scanner::BluestRadio;
pub use types::{
    DeviceAddress, DeviceMetadata, DeviceRecord, ListenerStatus, RawAdvertisement, ScanMode,
    StopReason,
};
pub use watcher::{DeviceWatcher, WatcherBuilder};
