//! Core functionality for the BLE roster watcher
//! This module contains the discovery bookkeeping and the platform radio backend

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{DeviceRecord, DeviceWatcher, EventChannel, WatcherEvent};
