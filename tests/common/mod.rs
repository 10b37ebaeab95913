#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ble_roster::WatcherConfig;
use ble_roster::core::bluetooth::{
    AdvertisementSource, Clock, DeviceAddress, DeviceWatcher, EventChannel, ListenerStatus,
    RadioEvent, RadioSink, RawAdvertisement, ScanMode, WatcherEvent,
};
use ble_roster::error::{Result, WatcherError};
use chrono::{DateTime, TimeDelta, Utc};

/// In-memory platform radio driven by the test.
#[derive(Default)]
pub struct MockRadio {
    sink: Mutex<Option<RadioSink>>,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub scan_mode: Mutex<Option<ScanMode>>,
    pub fail_start: AtomicBool,
}

impl MockRadio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delivers one advertisement. Returns false if the radio is not started.
    pub fn advertise(&self, advertisement: RawAdvertisement) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.send(RadioEvent::Advertisement(advertisement)).is_ok(),
            None => false,
        }
    }

    /// Simulates the radio halting on its own.
    pub fn halt(&self) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            let _ = sink.send(RadioEvent::ListenerStopped);
        }
    }
}

#[async_trait::async_trait]
impl AdvertisementSource for MockRadio {
    async fn set_scan_mode(&self, mode: ScanMode) -> Result<()> {
        *self.scan_mode.lock().unwrap() = Some(mode);
        Ok(())
    }

    async fn start(&self, sink: RadioSink) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(WatcherError::NoAdapter);
        }
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.sink.lock().unwrap().take();
        Ok(())
    }

    async fn status(&self) -> ListenerStatus {
        if self.sink.lock().unwrap().is_some() {
            ListenerStatus::Started
        } else {
            ListenerStatus::Stopped
        }
    }
}

/// Clock the test moves by hand.
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(t0())))
    }

    pub fn set_offset_secs(&self, secs: i64) {
        *self.0.lock().unwrap() = t0() + TimeDelta::seconds(secs);
    }

    pub fn as_clock(&self) -> Clock {
        let now = self.0.clone();
        Arc::new(move || *now.lock().unwrap())
    }
}

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + TimeDelta::seconds(secs)
}

pub fn adv(addr: u64, name: &str, secs: i64, rssi: i16) -> RawAdvertisement {
    RawAdvertisement::new(DeviceAddress::new(addr), name, at(secs), rssi)
}

/// Config without the background sweep so tests control every eviction.
pub fn quiet_config() -> WatcherConfig {
    WatcherConfig {
        sweep_interval_secs: 0,
        ..WatcherConfig::default()
    }
}

pub fn watcher_with(radio: &Arc<MockRadio>, clock: &ManualClock) -> DeviceWatcher {
    DeviceWatcher::builder(radio.clone(), quiet_config())
        .clock(clock.as_clock())
        .build()
        .unwrap()
}

/// Records every notification in order.
pub fn record_events(watcher: &DeviceWatcher) -> Arc<Mutex<Vec<WatcherEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for channel in [
        EventChannel::Started,
        EventChannel::Stopped,
        EventChannel::DeviceObserved,
        EventChannel::NewDevice,
        EventChannel::DeviceNameChanged,
        EventChannel::DeviceTimedOut,
    ] {
        let log = log.clone();
        watcher.subscribe(channel, move |event| log.lock().unwrap().push(event.clone()));
    }
    log
}

pub fn count(log: &Mutex<Vec<WatcherEvent>>, channel: EventChannel) -> usize {
    log.lock()
        .unwrap()
        .iter()
        .filter(|event| event.channel() == channel)
        .count()
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
