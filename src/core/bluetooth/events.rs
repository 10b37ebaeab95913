//! Watcher notifications
//! Observers subscribe per channel; dispatch is synchronous on the emitting task.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{error, trace};
use parking_lot::RwLock;

use crate::core::bluetooth::types::{DeviceRecord, StopReason};

/// The six notification channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventChannel {
    Started,
    Stopped,
    /// Every advertisement, new or repeat
    DeviceObserved,
    NewDevice,
    DeviceNameChanged,
    DeviceTimedOut,
}

/// A notification delivered to observers
#[derive(Debug, Clone, PartialEq)]
pub enum WatcherEvent {
    Started,
    Stopped(StopReason),
    DeviceObserved(DeviceRecord),
    NewDevice(DeviceRecord),
    DeviceNameChanged {
        previous_name: String,
        record: DeviceRecord,
    },
    /// Carries the last known record of the evicted device
    DeviceTimedOut(DeviceRecord),
}

impl WatcherEvent {
    pub fn channel(&self) -> EventChannel {
        match self {
            Self::Started => EventChannel::Started,
            Self::Stopped(_) => EventChannel::Stopped,
            Self::DeviceObserved(_) => EventChannel::DeviceObserved,
            Self::NewDevice(_) => EventChannel::NewDevice,
            Self::DeviceNameChanged { .. } => EventChannel::DeviceNameChanged,
            Self::DeviceTimedOut(_) => EventChannel::DeviceTimedOut,
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type EventHandler = Arc<dyn Fn(&WatcherEvent) + Send + Sync>;

/// Per-channel observer lists.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<EventChannel, Vec<(SubscriptionId, EventHandler)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, channel: EventChannel, handler: F) -> SubscriptionId
    where
        F: Fn(&WatcherEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(channel)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes the subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sub, _)| *sub == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn subscriber_count(&self, channel: EventChannel) -> usize {
        self.handlers
            .read()
            .get(&channel)
            .map_or(0, Vec::len)
    }

    /// Delivers `event` to every observer of its channel.
    ///
    /// The observer list is copied before invoking anyone, so handlers may
    /// subscribe or unsubscribe from inside a callback. A panicking handler is
    /// logged and skipped.
    pub fn emit(&self, event: WatcherEvent) {
        let channel = event.channel();
        let targets: Vec<EventHandler> = {
            let handlers = self.handlers.read();
            match handlers.get(&channel) {
                Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
                None => return,
            }
        };

        trace!("Dispatching {:?} to {} observers", channel, targets.len());
        for handler in targets {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!("Observer for {:?} panicked; continuing with the rest", channel);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emits_only_to_matching_channel() {
        let bus = EventBus::new();
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        bus.subscribe(EventChannel::Started, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        let s = stopped.clone();
        bus.subscribe(EventChannel::Stopped, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(WatcherEvent::Started);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(stopped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = bus.subscribe(EventChannel::Started, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.subscriber_count(EventChannel::Started), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(WatcherEvent::Started);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_observer_does_not_block_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventChannel::Started, |_| panic!("boom"));
        let h = hits.clone();
        bus.subscribe(EventChannel::Started, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(WatcherEvent::Started);
        bus.emit(WatcherEvent::Started);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn observer_may_unsubscribe_itself_during_dispatch() {
        let bus = Arc::new(EventBus::new());
        let own_id: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let (b, slot, h) = (bus.clone(), own_id.clone(), hits.clone());
        let id = bus.subscribe(EventChannel::Started, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *slot.lock().unwrap() {
                b.unsubscribe(id);
            }
        });
        *own_id.lock().unwrap() = Some(id);

        bus.emit(WatcherEvent::Started);
        bus.emit(WatcherEvent::Started);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(EventChannel::Started), 0);
    }
}
