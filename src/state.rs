//! Application state management
//! Holds the watcher and the config it was built from.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::info;
use tokio::sync::Mutex;

use crate::config::WatcherConfig;
use crate::core::bluetooth::BluestRadio;
use crate::core::DeviceWatcher;

/// Shell application state
pub struct AppState {
    /// The watcher instance
    pub watcher: DeviceWatcher,
    /// Config as loaded, updated by runtime changes before saving
    pub config: Mutex<WatcherConfig>,
    /// Where `save` writes the config
    pub config_path: PathBuf,
}

impl AppState {
    /// Loads the config and opens the default Bluetooth adapter.
    pub async fn new(config_path: PathBuf) -> Result<Self> {
        let config = WatcherConfig::load_config(&config_path).await?;

        info!("Initializing Bluetooth radio...");
        let radio = Arc::new(BluestRadio::new(config.service_filter.clone(), config.min_rssi).await?);
        let watcher = DeviceWatcher::builder(radio.clone(), config.clone())
            .resolver(radio)
            .build()?;
        Ok(Self::with_watcher(watcher, config, config_path))
    }

    pub fn with_watcher(watcher: DeviceWatcher, config: WatcherConfig, config_path: PathBuf) -> Self {
        Self {
            watcher,
            config: Mutex::new(config),
            config_path,
        }
    }
}
