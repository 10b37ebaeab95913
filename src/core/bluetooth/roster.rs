//! Discovered device roster
//! Owns the address -> record map and the single lock guarding it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::core::bluetooth::types::{DeviceAddress, DeviceMetadata, DeviceRecord, RawAdvertisement};

/// Heartbeat timeout shared by the ingestion path and the watcher.
/// A change takes effect on the next sweep.
#[derive(Debug)]
pub struct HeartbeatTimeout(AtomicU64);

impl HeartbeatTimeout {
    pub fn new(timeout: Duration) -> Self {
        Self(AtomicU64::new(Self::to_millis(timeout)))
    }

    pub fn get(&self) -> Duration {
        Duration::from_millis(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, timeout: Duration) {
        self.0.store(Self::to_millis(timeout), Ordering::Relaxed);
    }

    /// Saturates at `u64::MAX` ms, which never evicts anything.
    fn to_millis(timeout: Duration) -> u64 {
        u64::try_from(timeout.as_millis()).unwrap_or_else(|_| {
            warn!("Heartbeat timeout {:?} out of range, clamping", timeout);
            u64::MAX
        })
    }
}

/// Result of applying one advertisement to the roster.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// The record now stored for the advertised address
    pub record: DeviceRecord,
    /// The address was absent before this advertisement
    pub is_new: bool,
    /// Previous name, set only when a known name was replaced by a different one
    pub previous_name: Option<String>,
    /// Records evicted by the sweep that preceded the update
    pub evicted: Vec<DeviceRecord>,
}

impl IngestOutcome {
    pub fn name_changed(&self) -> bool {
        self.previous_name.is_some()
    }
}

/// Point-in-time copy of the roster.
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    /// Live records ordered by address
    pub devices: Vec<DeviceRecord>,
    /// Records the pre-read sweep removed; the caller announces them
    pub evicted: Vec<DeviceRecord>,
}

/// Concurrency-guarded mapping of device address to its latest record.
#[derive(Debug, Default)]
pub struct RosterStore {
    devices: Mutex<HashMap<DeviceAddress, DeviceRecord>>,
}

impl RosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DeviceAddress, DeviceRecord>> {
        self.devices.lock()
    }

    /// Inserts or replaces the record for `address`. Returns true if the address was absent.
    pub fn upsert(&self, address: DeviceAddress, record: DeviceRecord) -> bool {
        self.lock().insert(address, record).is_none()
    }

    pub fn get(&self, address: DeviceAddress) -> Option<DeviceRecord> {
        self.lock().get(&address).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sweeps stale entries, then copies the remaining records out, all under one lock.
    pub fn snapshot(&self, now: DateTime<Utc>, timeout: Duration) -> RosterSnapshot {
        let mut devices = self.lock();
        let evicted = evict_stale(&mut devices, now, timeout);
        let mut live: Vec<DeviceRecord> = devices.values().cloned().collect();
        live.sort_by_key(DeviceRecord::address);
        RosterSnapshot { devices: live, evicted }
    }

    /// Removes every entry last seen more than `timeout` before `now`.
    pub fn sweep_timeouts(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<DeviceRecord> {
        let mut devices = self.lock();
        evict_stale(&mut devices, now, timeout)
    }

    /// Drops all entries without reporting them as timed out.
    pub fn clear(&self) {
        let mut devices = self.lock();
        debug!("Clearing roster ({} devices)", devices.len());
        devices.clear();
    }

    /// Sweep, look up, decide and upsert in one critical section.
    ///
    /// Only the advertised name can rename a device; an empty one keeps the
    /// known name. The platform display name is a fallback for devices that
    /// have never advertised a name and is never reported as a change.
    /// Filling an empty name is not a change either. The stored timestamp
    /// never moves backwards.
    pub fn apply(
        &self,
        advertisement: &RawAdvertisement,
        metadata: Option<&DeviceMetadata>,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> IngestOutcome {
        let mut devices = self.lock();
        let evicted = evict_stale(&mut devices, now, timeout);

        let existing = devices.get(&advertisement.address);
        let is_new = existing.is_none();

        let advertised = advertisement.local_name.as_str();
        let known = existing.map(DeviceRecord::name).unwrap_or_default();
        let known_advertised = existing.is_some_and(DeviceRecord::has_advertised_name);

        let previous_name = Some(known)
            .filter(|prev| known_advertised && !advertised.is_empty() && *prev != advertised)
            .map(str::to_string);

        let (name, name_advertised) = if !advertised.is_empty() {
            (advertised, true)
        } else if !known.is_empty() {
            (known, known_advertised)
        } else {
            (metadata.map(|m| m.display_name.as_str()).unwrap_or_default(), false)
        };

        let last_seen = existing
            .map(|prev| prev.last_seen().max(advertisement.timestamp))
            .unwrap_or(advertisement.timestamp);

        let platform_id = advertisement
            .platform_id
            .clone()
            .or_else(|| existing.and_then(|prev| prev.platform_id().map(str::to_string)));

        let (is_connected, can_pair, is_paired) = match metadata {
            Some(m) => (m.is_connected, m.can_pair, m.is_paired),
            None => (false, advertisement.is_connectable, false),
        };

        let record = DeviceRecord::new(
            advertisement.address,
            name,
            last_seen,
            advertisement.rssi,
            is_connected,
            can_pair,
            is_paired,
        )
        .with_platform_id(platform_id);
        let record = if name_advertised {
            record
        } else {
            record.with_platform_name()
        };

        devices.insert(advertisement.address, record.clone());

        IngestOutcome {
            record,
            is_new,
            previous_name,
            evicted,
        }
    }
}

fn evict_stale(
    devices: &mut HashMap<DeviceAddress, DeviceRecord>,
    now: DateTime<Utc>,
    timeout: Duration,
) -> Vec<DeviceRecord> {
    let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
    let stale: Vec<DeviceAddress> = devices
        .values()
        .filter(|record| now.signed_duration_since(record.last_seen()) > timeout)
        .map(DeviceRecord::address)
        .collect();

    let mut evicted: Vec<DeviceRecord> = stale
        .into_iter()
        .filter_map(|address| devices.remove(&address))
        .collect();
    evicted.sort_by_key(DeviceRecord::address);
    if !evicted.is_empty() {
        debug!("Evicted {} stale devices", evicted.len());
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn adv(addr: u64, name: &str, at: DateTime<Utc>, rssi: i16) -> RawAdvertisement {
        RawAdvertisement::new(DeviceAddress::new(addr), name, at, rssi)
    }

    #[test]
    fn upsert_reports_first_insert_only() {
        let roster = RosterStore::new();
        let addr = DeviceAddress::new(7);
        let rec = DeviceRecord::new(addr, "a", t0(), -50, false, false, false);
        assert!(roster.upsert(addr, rec.clone()));
        assert!(!roster.upsert(addr, rec));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn new_then_repeat() {
        let roster = RosterStore::new();
        let first = roster.apply(&adv(1, "Foo", t0(), -60), None, t0(), TIMEOUT);
        assert!(first.is_new);
        assert!(!first.name_changed());

        let later = t0() + TimeDelta::seconds(5);
        let second = roster.apply(&adv(1, "Foo", later, -40), None, later, TIMEOUT);
        assert!(!second.is_new);
        assert!(!second.name_changed());
        assert_eq!(second.record.rssi(), -40);
        assert_eq!(second.record.last_seen(), later);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn name_fill_then_change() {
        let roster = RosterStore::new();
        roster.apply(&adv(1, "", t0(), -60), None, t0(), TIMEOUT);

        let filled = roster.apply(&adv(1, "Foo", t0(), -60), None, t0(), TIMEOUT);
        assert!(!filled.name_changed());
        assert_eq!(filled.record.name(), "Foo");

        let changed = roster.apply(&adv(1, "Bar", t0(), -60), None, t0(), TIMEOUT);
        assert_eq!(changed.previous_name.as_deref(), Some("Foo"));
        assert_eq!(roster.get(DeviceAddress::new(1)).unwrap().name(), "Bar");
    }

    #[test]
    fn empty_name_keeps_known_name() {
        let roster = RosterStore::new();
        roster.apply(&adv(1, "Foo", t0(), -60), None, t0(), TIMEOUT);
        let outcome = roster.apply(&adv(1, "", t0(), -61), None, t0(), TIMEOUT);
        assert!(!outcome.name_changed());
        assert_eq!(outcome.record.name(), "Foo");
    }

    #[test]
    fn metadata_name_used_when_advertisement_has_none() {
        let roster = RosterStore::new();
        let meta = DeviceMetadata {
            display_name: "Platform Name".into(),
            is_connected: true,
            can_pair: true,
            is_paired: true,
        };
        let outcome = roster.apply(&adv(1, "", t0(), -60), Some(&meta), t0(), TIMEOUT);
        assert_eq!(outcome.record.name(), "Platform Name");
        assert!(outcome.record.is_connected());
        assert!(outcome.record.is_paired());
    }

    #[test]
    fn metadata_name_never_renames_a_known_device() {
        let roster = RosterStore::new();
        let meta = DeviceMetadata {
            display_name: "Platform".into(),
            ..DeviceMetadata::default()
        };
        let first = roster.apply(&adv(1, "Foo", t0(), -60), Some(&meta), t0(), TIMEOUT);
        assert_eq!(first.record.name(), "Foo");

        for name in ["", "Foo", "", "Foo"] {
            let outcome = roster.apply(&adv(1, name, t0(), -60), Some(&meta), t0(), TIMEOUT);
            assert!(!outcome.name_changed());
            assert_eq!(outcome.record.name(), "Foo");
        }
    }

    #[test]
    fn advertised_name_replacing_metadata_name_is_a_fill() {
        let roster = RosterStore::new();
        let meta = DeviceMetadata {
            display_name: "Platform".into(),
            ..DeviceMetadata::default()
        };
        roster.apply(&adv(1, "", t0(), -60), Some(&meta), t0(), TIMEOUT);

        let outcome = roster.apply(&adv(1, "Foo", t0(), -60), Some(&meta), t0(), TIMEOUT);
        assert!(!outcome.name_changed());
        assert_eq!(outcome.record.name(), "Foo");
        assert!(outcome.record.has_advertised_name());

        let renamed = roster.apply(&adv(1, "Bar", t0(), -60), Some(&meta), t0(), TIMEOUT);
        assert_eq!(renamed.previous_name.as_deref(), Some("Foo"));
    }

    #[test]
    fn oversized_heartbeat_saturates_instead_of_wrapping() {
        let heartbeat = HeartbeatTimeout::new(Duration::from_secs(30));
        heartbeat.set(Duration::from_secs(18_446_744_073_709_552));
        assert_eq!(heartbeat.get(), Duration::from_millis(u64::MAX));

        let roster = RosterStore::new();
        roster.apply(&adv(1, "A", t0(), -60), None, t0(), TIMEOUT);
        let later = t0() + TimeDelta::days(365);
        assert!(roster.sweep_timeouts(later, heartbeat.get()).is_empty());
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn panic_while_locked_does_not_wedge_the_roster() {
        let roster = Arc::new(RosterStore::new());
        roster.apply(&adv(1, "A", t0(), -60), None, t0(), TIMEOUT);

        let holder = roster.clone();
        let result = thread::spawn(move || {
            let _devices = holder.lock();
            panic!("holder failed");
        })
        .join();
        assert!(result.is_err());

        let outcome = roster.apply(&adv(2, "B", t0(), -60), None, t0(), TIMEOUT);
        assert!(outcome.is_new);
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn timestamp_never_moves_backwards() {
        let roster = RosterStore::new();
        let later = t0() + TimeDelta::seconds(10);
        roster.apply(&adv(1, "Foo", later, -60), None, later, TIMEOUT);
        let outcome = roster.apply(&adv(1, "Foo", t0(), -70), None, later, TIMEOUT);
        assert_eq!(outcome.record.last_seen(), later);
        assert_eq!(outcome.record.rssi(), -70);
    }

    #[test]
    fn sweep_respects_timeout_boundary() {
        let roster = RosterStore::new();
        roster.apply(&adv(1, "A", t0(), -60), None, t0(), TIMEOUT);

        let kept = roster.sweep_timeouts(t0() + TimeDelta::seconds(29), TIMEOUT);
        assert!(kept.is_empty());
        assert_eq!(roster.len(), 1);

        let evicted = roster.sweep_timeouts(t0() + TimeDelta::seconds(31), TIMEOUT);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].name(), "A");
        assert!(roster.is_empty());
    }

    #[test]
    fn stale_entry_is_new_again_after_apply_sweep() {
        let roster = RosterStore::new();
        roster.apply(&adv(1, "Old", t0(), -60), None, t0(), TIMEOUT);

        let later = t0() + TimeDelta::seconds(60);
        let outcome = roster.apply(&adv(1, "New", later, -60), None, later, TIMEOUT);
        assert!(outcome.is_new);
        assert!(!outcome.name_changed());
        assert_eq!(outcome.evicted.len(), 1);
    }

    #[test]
    fn snapshot_is_sorted_swept_and_detached() {
        let roster = RosterStore::new();
        roster.apply(&adv(3, "C", t0(), -60), None, t0(), TIMEOUT);
        roster.apply(&adv(1, "A", t0() + TimeDelta::seconds(20), -60), None, t0(), TIMEOUT);

        let snap = roster.snapshot(t0() + TimeDelta::seconds(40), TIMEOUT);
        assert_eq!(snap.evicted.len(), 1);
        assert_eq!(snap.evicted[0].name(), "C");
        assert_eq!(snap.devices.len(), 1);

        roster.apply(&adv(2, "B", t0() + TimeDelta::seconds(40), -60), None, t0(), TIMEOUT);
        roster.clear();
        assert_eq!(snap.devices.len(), 1);
        assert_eq!(snap.devices[0].name(), "A");
    }

    #[test]
    fn concurrent_distinct_addresses_are_all_kept() {
        let roster = Arc::new(RosterStore::new());
        let handles: Vec<_> = (0..64u64)
            .map(|i| {
                let roster = roster.clone();
                thread::spawn(move || roster.apply(&adv(i, "dev", t0(), -50), None, t0(), TIMEOUT))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_new);
        }
        assert_eq!(roster.len(), 64);
    }

    #[test]
    fn concurrent_same_address_yields_single_new() {
        let roster = Arc::new(RosterStore::new());
        let handles: Vec<_> = (0..32i16)
            .map(|i| {
                let roster = roster.clone();
                thread::spawn(move || {
                    roster.apply(&adv(9, "same", t0(), -i), None, t0(), TIMEOUT).is_new
                })
            })
            .collect();
        let new_count = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|is_new| *is_new)
            .count();
        assert_eq!(new_count, 1);
        assert_eq!(roster.len(), 1);
        let record = roster.get(DeviceAddress::new(9)).unwrap();
        assert_eq!(record.name(), "same");
        assert!((-31..=0).contains(&record.rssi()));
    }
}
