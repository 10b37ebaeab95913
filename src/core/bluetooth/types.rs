//! Defines shared data structures for the Bluetooth module.
//! Records are immutable snapshots; the roster replaces them wholesale.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};

use crate::core::bluetooth::constants::UNKNOWN_DEVICE_NAME;
use crate::error::WatcherError;

static MAC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("valid MAC regex")
});

/// 48-bit Bluetooth hardware address, the key of the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(u64);

impl DeviceAddress {
    pub const fn new(raw: u64) -> Self {
        Self(raw & 0xFFFF_FFFF_FFFF)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Extracts the address from a platform-specific device id.
    ///
    /// Platform ids usually embed the MAC somewhere: BlueZ object paths end in
    /// `dev_AA_BB_CC_DD_EE_FF`, WinRT ids end with `-aa:bb:cc:dd:ee:ff`.
    /// Underscores count as separators and the last match wins. CoreBluetooth
    /// ids are opaque UUIDs and yield None.
    pub fn extract_from(platform_id: &str) -> Option<Self> {
        let normalised = platform_id.replace('_', ":");
        MAC_PATTERN
            .find_iter(&normalised)
            .last()
            .and_then(|m| m.as_str().parse().ok())
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]
        )
    }
}

impl FromStr for DeviceAddress {
    type Err = WatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(WatcherError::InvalidAddress(s.to_string()));
        }
        let mut raw = 0u64;
        for part in parts {
            let byte = u8::from_str_radix(part, 16)
                .map_err(|_| WatcherError::InvalidAddress(s.to_string()))?;
            raw = (raw << 8) | byte as u64;
        }
        Ok(Self(raw))
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<u64> for DeviceAddress {
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}

/// Snapshot of one observed device at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    address: DeviceAddress,
    name: String,
    last_seen: DateTime<Utc>,
    rssi: i16,
    is_connected: bool,
    can_pair: bool,
    is_paired: bool,
    /// Platform device id, if the backend reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    platform_id: Option<String>,
    /// False when `name` is the platform display name rather than an advertised one
    #[serde(skip)]
    name_advertised: bool,
}

impl DeviceRecord {
    /// Creates a new DeviceRecord instance
    pub fn new(
        address: DeviceAddress,
        name: impl Into<String>,
        last_seen: DateTime<Utc>,
        rssi: i16,
        is_connected: bool,
        can_pair: bool,
        is_paired: bool,
    ) -> Self {
        let name = name.into();
        Self {
            name_advertised: !name.is_empty(),
            address,
            name,
            last_seen,
            rssi,
            is_connected,
            can_pair,
            is_paired,
            platform_id: None,
        }
    }

    /// Attaches the platform device id. Only meant to be chained onto `new`.
    pub fn with_platform_id(mut self, platform_id: Option<String>) -> Self {
        self.platform_id = platform_id;
        self
    }

    /// Marks the name as coming from the platform device stack, not an advertisement.
    pub(crate) fn with_platform_name(mut self) -> Self {
        self.name_advertised = false;
        self
    }

    /// True when the stored name was taken from an advertisement.
    pub fn has_advertised_name(&self) -> bool {
        self.name_advertised
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Display name; empty when the device has never advertised one.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    /// Signal strength in dBm
    pub fn rssi(&self) -> i16 {
        self.rssi
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    pub fn can_pair(&self) -> bool {
        self.can_pair
    }

    pub fn is_paired(&self) -> bool {
        self.is_paired
    }

    pub fn platform_id(&self) -> Option<&str> {
        self.platform_id.as_deref()
    }

    /// Human readable one-liner: name (or placeholder), address and RSSI.
    pub fn summary(&self) -> String {
        let name = if self.name.is_empty() {
            UNKNOWN_DEVICE_NAME
        } else {
            self.name.as_str()
        };
        format!("{} [{}] {} dBm", name, self.address, self.rssi)
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// One raw advertisement as delivered by the platform radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisement {
    pub address: DeviceAddress,
    /// Advertised local name, empty if the packet carried none
    pub local_name: String,
    /// Time the broadcast was received
    pub timestamp: DateTime<Utc>,
    pub rssi: i16,
    pub platform_id: Option<String>,
    pub is_connectable: bool,
}

impl RawAdvertisement {
    pub fn new(
        address: DeviceAddress,
        local_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        rssi: i16,
    ) -> Self {
        Self {
            address,
            local_name: local_name.into(),
            timestamp,
            rssi,
            platform_id: None,
            is_connectable: false,
        }
    }
}

/// Connection and pairing details fetched from the platform device stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMetadata {
    pub display_name: String,
    pub is_connected: bool,
    pub can_pair: bool,
    pub is_paired: bool,
}

/// Radio scan mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Send scan requests to receive scan responses (names often live there)
    #[default]
    Active,
    /// Only listen to broadcasts
    Passive,
}

/// Status reported by the platform listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    Stopped,
    Started,
}

/// Why a listening session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// `stop_listening()` was called
    Requested,
    /// The platform listener halted on its own (radio off, adapter removed, ...)
    PlatformHalted,
}
