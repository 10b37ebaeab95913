//! BLE roster watcher library
//! Passively observes Bluetooth LE advertisements and keeps a live roster of
//! nearby devices, with discovery, rename and timeout notifications.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod state;

pub use config::WatcherConfig;
pub use error::{Result, WatcherError};
