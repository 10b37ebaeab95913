//! Advertisement ingestion
//! Turns one raw advertisement into a roster update plus notifications.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::ReentrantMutex;

use crate::core::bluetooth::events::{EventBus, WatcherEvent};
use crate::core::bluetooth::radio::DeviceResolver;
use crate::core::bluetooth::roster::{HeartbeatTimeout, IngestOutcome, RosterStore};
use crate::core::bluetooth::types::{DeviceMetadata, DeviceRecord, RawAdvertisement};

/// Source of "now" for timeout sweeps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Applies advertisements to the roster and fans out the resulting events.
///
/// Every roster change and its notifications form one step under `dispatch`,
/// so observers see changes in the order they were applied. The lock is
/// reentrant: a handler may read the roster from inside a callback.
#[derive(Clone)]
pub struct AdvertisementIngestor {
    dispatch: Arc<ReentrantMutex<()>>,
    roster: Arc<RosterStore>,
    bus: Arc<EventBus>,
    heartbeat: Arc<HeartbeatTimeout>,
    resolver: Option<Arc<dyn DeviceResolver>>,
    resolve_timeout: Duration,
    clock: Clock,
}

impl AdvertisementIngestor {
    pub fn new(
        roster: Arc<RosterStore>,
        bus: Arc<EventBus>,
        heartbeat: Arc<HeartbeatTimeout>,
        clock: Clock,
    ) -> Self {
        Self {
            dispatch: Arc::new(ReentrantMutex::new(())),
            roster,
            bus,
            heartbeat,
            resolver: None,
            resolve_timeout: Duration::ZERO,
            clock,
        }
    }

    /// Enables the secondary metadata lookup, bounded by `timeout`.
    pub fn with_resolver(mut self, resolver: Arc<dyn DeviceResolver>, timeout: Duration) -> Self {
        self.resolver = Some(resolver);
        self.resolve_timeout = timeout;
        self
    }

    /// Processes one advertisement. Returns None if it was dropped.
    ///
    /// Metadata is resolved before the roster lock is taken; the roster update
    /// itself is a single critical section.
    pub async fn ingest(&self, advertisement: RawAdvertisement) -> Option<IngestOutcome> {
        let metadata = match &self.resolver {
            Some(resolver) => {
                let lookup = resolver.resolve(advertisement.address);
                match tokio::time::timeout(self.resolve_timeout, lookup).await {
                    Ok(Some(metadata)) => Some(metadata),
                    Ok(None) => {
                        debug!("Device {} not resolvable, dropping advertisement", advertisement.address);
                        return None;
                    }
                    Err(_) => {
                        warn!(
                            "Metadata lookup for {} timed out after {:?}, dropping advertisement",
                            advertisement.address, self.resolve_timeout
                        );
                        return None;
                    }
                }
            }
            None => None,
        };

        Some(self.commit(&advertisement, metadata.as_ref()))
    }

    fn commit(
        &self,
        advertisement: &RawAdvertisement,
        metadata: Option<&DeviceMetadata>,
    ) -> IngestOutcome {
        let _dispatch = self.dispatch.lock();
        let outcome = self.roster.apply(
            advertisement,
            metadata,
            (self.clock)(),
            self.heartbeat.get(),
        );

        self.announce_timeouts(&outcome.evicted);
        self.bus.emit(WatcherEvent::DeviceObserved(outcome.record.clone()));
        if let Some(previous_name) = &outcome.previous_name {
            info!("Device {} renamed: {:?} -> {:?}", outcome.record.address(), previous_name, outcome.record.name());
            self.bus.emit(WatcherEvent::DeviceNameChanged {
                previous_name: previous_name.clone(),
                record: outcome.record.clone(),
            });
        }
        if outcome.is_new {
            info!("New device discovered: {}", outcome.record);
            self.bus.emit(WatcherEvent::NewDevice(outcome.record.clone()));
        }
        outcome
    }

    /// Evicts stale devices and announces each one. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let _dispatch = self.dispatch.lock();
        let evicted = self.roster.sweep_timeouts((self.clock)(), self.heartbeat.get());
        self.announce_timeouts(&evicted);
        evicted.len()
    }

    /// Swept copy of the roster, ordered by address.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let _dispatch = self.dispatch.lock();
        let snapshot = self.roster.snapshot((self.clock)(), self.heartbeat.get());
        self.announce_timeouts(&snapshot.evicted);
        snapshot.devices
    }

    fn announce_timeouts(&self, evicted: &[DeviceRecord]) {
        for record in evicted {
            info!("Device timed out: {}", record);
            self.bus.emit(WatcherEvent::DeviceTimedOut(record.clone()));
        }
    }
}
