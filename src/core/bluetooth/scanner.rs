//! bluest-backed platform radio
//! Streams advertisements from the default adapter into the watcher's sink.

use std::collections::HashMap;
use std::sync::Arc;

use bluest::{Adapter, AdvertisingDevice, Device, Uuid};
use chrono::Utc;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::radio::{AdvertisementSource, DeviceResolver, RadioEvent, RadioSink};
use crate::core::bluetooth::types::{
    DeviceAddress, DeviceMetadata, ListenerStatus, RawAdvertisement, ScanMode,
};
use crate::error::{Result, WatcherError};

struct KnownDevice {
    device: Device,
    connectable: bool,
}

type KnownDevices = Arc<Mutex<HashMap<DeviceAddress, KnownDevice>>>;

struct ScanTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct BluestRadio {
    adapter: Adapter,
    devices: KnownDevices,
    service_filter: Vec<Uuid>,
    min_rssi: Option<i16>,
    scan_mode: Mutex<ScanMode>,
    scan_task: tokio::sync::Mutex<Option<ScanTask>>,
}

impl BluestRadio {
    /// Opens the default adapter and waits for it to become available.
    pub async fn new(service_filter: Vec<Uuid>, min_rssi: Option<i16>) -> Result<Self> {
        let adapter = Adapter::default().await.ok_or(WatcherError::NoAdapter)?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");

        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            service_filter,
            min_rssi,
            scan_mode: Mutex::new(ScanMode::default()),
            scan_task: tokio::sync::Mutex::new(None),
        })
    }

    /// Last scan mode requested through `set_scan_mode`.
    pub fn scan_mode(&self) -> ScanMode {
        *self.scan_mode.lock()
    }

    async fn internal_scan_task(
        adapter: Adapter,
        devices: KnownDevices,
        sink: RadioSink,
        cancel_token: CancellationToken,
        service_filter: Vec<Uuid>,
        min_rssi: Option<i16>,
    ) {
        info!("Starting bluetooth scan");
        let mut scan_stream = match adapter.scan(&service_filter).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start bluetooth scan: {}", e);
                let _ = sink.send(RadioEvent::ListenerStopped);
                return;
            }
        };

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered) => {
                            let Some(advertisement) = Self::to_advertisement(&devices, discovered, min_rssi) else {
                                continue;
                            };
                            if sink.send(RadioEvent::Advertisement(advertisement)).is_err() {
                                debug!("Advertisement sink closed, ending scan task.");
                                break;
                            }
                        }
                        None => {
                            warn!("Bluetooth scan stream has ended.");
                            let _ = sink.send(RadioEvent::ListenerStopped);
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    }

    /// Converts a bluest discovery into a raw advertisement, remembering the device handle.
    fn to_advertisement(
        devices: &KnownDevices,
        discovered: AdvertisingDevice,
        min_rssi: Option<i16>,
    ) -> Option<RawAdvertisement> {
        let id = discovered.device.id().to_string();
        let Some(address) = DeviceAddress::extract_from(&id) else {
            debug!("No hardware address in device id {:?}, dropping", id);
            return None;
        };
        let Some(rssi) = discovered.rssi else {
            debug!("Advertisement from {} carried no RSSI, dropping", address);
            return None;
        };
        if min_rssi.is_some_and(|min| rssi < min) {
            return None;
        }

        let connectable = discovered.adv_data.is_connectable;
        devices.lock().insert(
            address,
            KnownDevice {
                device: discovered.device,
                connectable,
            },
        );

        Some(RawAdvertisement {
            address,
            local_name: discovered.adv_data.local_name.unwrap_or_default(),
            timestamp: Utc::now(),
            rssi,
            platform_id: Some(id),
            is_connectable: connectable,
        })
    }
}

#[async_trait::async_trait]
impl AdvertisementSource for BluestRadio {
    async fn set_scan_mode(&self, mode: ScanMode) -> Result<()> {
        // bluest picks the scan type itself; the mode is kept for reporting only.
        info!("Scan mode set to {:?} (advisory on this backend)", mode);
        *self.scan_mode.lock() = mode;
        Ok(())
    }

    async fn start(&self, sink: RadioSink) -> Result<()> {
        let mut scan_task = self.scan_task.lock().await;
        if let Some(task) = scan_task.take() {
            task.cancel_token.cancel();
            let _ = task.handle.await;
        }
        self.devices.lock().clear();

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(Self::internal_scan_task(
            self.adapter.clone(),
            self.devices.clone(),
            sink,
            cancel_token.clone(),
            self.service_filter.clone(),
            self.min_rssi,
        ));
        *scan_task = Some(ScanTask {
            cancel_token,
            handle,
        });
        info!("Device scan task started.");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        info!("Stopping Bluetooth scan.");
        let Some(task) = self.scan_task.lock().await.take() else {
            info!("No active scan task handle found to wait for.");
            return Ok(());
        };
        task.cancel_token.cancel();
        match task.handle.await {
            Ok(()) => info!("Scan task finished after cancellation."),
            Err(e) if e.is_cancelled() => info!("Scan task was cancelled."),
            Err(e) => error!("Scan task finished with an unexpected join error: {:?}", e),
        }
        self.devices.lock().clear();
        Ok(())
    }

    async fn status(&self) -> ListenerStatus {
        match self.scan_task.lock().await.as_ref() {
            Some(task) if !task.handle.is_finished() => ListenerStatus::Started,
            _ => ListenerStatus::Stopped,
        }
    }
}

#[async_trait::async_trait]
impl DeviceResolver for BluestRadio {
    async fn resolve(&self, address: DeviceAddress) -> Option<DeviceMetadata> {
        let (device, connectable) = {
            let devices = self.devices.lock();
            let known = devices.get(&address)?;
            (known.device.clone(), known.connectable)
        };

        let display_name = device.name().unwrap_or_default();
        let is_connected = device.is_connected().await;
        let is_paired = device.is_paired().await.unwrap_or(false);
        Some(DeviceMetadata {
            display_name,
            is_connected,
            can_pair: connectable,
            is_paired,
        })
    }
}
