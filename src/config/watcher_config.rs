use crate::core::bluetooth::constants::{
    DEFAULT_HEARTBEAT_TIMEOUT_SECS, DEFAULT_RESOLVE_TIMEOUT_MS, DEFAULT_SWEEP_INTERVAL_SECS,
};
use crate::core::bluetooth::ScanMode;
use crate::error::WatcherError;
use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use uuid::Uuid;

pub const CONFIG_FILE_NAME: &str = "watcher_config.json";

/// Watcher settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Seconds without an advertisement before a device is evicted
    pub heartbeat_timeout_secs: u64,
    /// Period of the background timeout sweep in seconds. 0 disables it; sweeps
    /// then only happen on ingestion and roster reads.
    pub sweep_interval_secs: u64,
    /// Requested radio scan mode
    pub scan_mode: ScanMode,
    /// Upper bound on one connection/pairing metadata lookup
    pub resolve_timeout_ms: u64,
    /// Only report devices advertising one of these services. Empty means all.
    pub service_filter: Vec<Uuid>,
    /// Ignore advertisements weaker than this (dBm)
    pub min_rssi: Option<i16>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            heartbeat_timeout_secs: DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            scan_mode: ScanMode::Active,
            resolve_timeout_ms: DEFAULT_RESOLVE_TIMEOUT_MS,
            service_filter: Vec::new(),
            min_rssi: None,
        }
    }
}

impl WatcherConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    /// Rejects settings the watcher cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.heartbeat_timeout_secs == 0 {
            return Err(WatcherError::InvalidConfig(
                "heartbeat_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.resolve_timeout_ms == 0 {
            return Err(WatcherError::InvalidConfig(
                "resolve_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads the config from `file_path`, falling back to defaults if it does not exist.
    pub async fn load_config(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            warn!(
                "Watcher config file not found at {:?}, using default.",
                file_path
            );
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;
        config.validate()?;

        info!("Watcher config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the current config to `file_path`, creating parent directories.
    pub async fn save_config(&self, file_path: &Path) -> Result<()> {
        if let Some(config_dir) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !config_dir.exists() {
                fs::create_dir_all(config_dir).await?;
                info!("Created config directory at: {:?}", config_dir);
            }
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize watcher config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;

        info!("Watcher config saved to {:?}.", file_path);
        Ok(())
    }
}
