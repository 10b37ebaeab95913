//! Constants used throughout the watcher
//! Defaults for timeouts and intervals, plus placeholder strings.

/// Placeholder shown for devices that never advertised a name
pub const UNKNOWN_DEVICE_NAME: &str = "<unknown>";

/// Default heartbeat timeout in seconds
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Default interval of the background timeout sweep in seconds (0 disables it)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;

/// Default bound on a single device metadata lookup in milliseconds
pub const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 2000;
