//! btleplug implementation of [`BleCentral`] and [`BlePeripheral`].

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info};
use uuid::Uuid;

use crate::backend::{BleCentral, BlePeripheral, WriteMode};
use crate::error::{FrameError, TransportError};

fn adapter_error(e: btleplug::Error) -> FrameError {
    FrameError::Adapter(e.to_string())
}

// ── BtleplugCentral ───────────────────────────────────────────────────────────

/// The system Bluetooth adapter, driven through btleplug.
#[derive(Clone, Debug)]
pub struct BtleplugCentral {
    adapter: Adapter,
}

impl BtleplugCentral {
    /// Wrap an adapter the caller already holds.
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Open the first Bluetooth adapter on the system.
    ///
    /// On macOS, `CBCentralManager` needs a moment to reach the *poweredOn*
    /// state after initialisation; we wait up to 3 s for that, since a scan
    /// started earlier is silently dropped.
    pub async fn first_adapter() -> Result<Self, FrameError> {
        let manager = Manager::new().await.map_err(adapter_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(adapter_error)?
            .into_iter()
            .next()
            .ok_or_else(|| FrameError::Adapter("no Bluetooth adapter found".into()))?;

        #[cfg(target_os = "macos")]
        {
            use btleplug::api::CentralState;
            use log::warn;

            let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
            loop {
                match adapter.adapter_state().await {
                    Ok(CentralState::PoweredOn) => {
                        info!("macOS: adapter is PoweredOn");
                        break;
                    }
                    Ok(state) => {
                        if tokio::time::Instant::now() >= deadline {
                            warn!("macOS: adapter still in state {state:?} after 3 s — proceeding anyway");
                            break;
                        }
                        debug!("macOS: adapter state = {state:?}, waiting…");
                    }
                    Err(e) => {
                        warn!("macOS: adapter_state() error: {e}");
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        Ok(Self { adapter })
    }
}

#[async_trait]
impl BleCentral for BtleplugCentral {
    type Peripheral = BtleplugPeripheral;

    async fn start_scan(&self, service: Uuid) -> Result<(), FrameError> {
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await
            .map_err(adapter_error)
    }

    async fn stop_scan(&self) -> Result<(), FrameError> {
        self.adapter.stop_scan().await.map_err(adapter_error)
    }

    async fn discoveries(
        &self,
        service: Uuid,
    ) -> Result<BoxStream<'static, BtleplugPeripheral>, FrameError> {
        let events = self.adapter.events().await.map_err(adapter_error)?;
        let adapter = self.adapter.clone();

        // The scan filter is advisory on some platforms, so the advertised
        // service list is checked again here.
        let found = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => return None,
                };
                let peripheral = adapter.peripheral(&id).await.ok()?;
                let props = peripheral.properties().await.ok().flatten()?;
                if !props.services.contains(&service) {
                    debug!("ignoring {id:?}: does not advertise {service}");
                    return None;
                }
                Some(BtleplugPeripheral {
                    peripheral,
                    name: props.local_name,
                })
            }
        });
        Ok(Box::pin(found))
    }
}

// ── BtleplugPeripheral ────────────────────────────────────────────────────────

/// A Frame found during a scan.
#[derive(Clone, Debug)]
pub struct BtleplugPeripheral {
    peripheral: Peripheral,
    name: Option<String>,
}

impl BtleplugPeripheral {
    fn characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
    }
}

#[async_trait]
impl BlePeripheral for BtleplugPeripheral {
    fn id(&self) -> String {
        self.peripheral.id().to_string()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        // BlueZ's org.bluez.Device1.Connect can block forever when the device
        // is out of range or the stack is in a bad state.
        tokio::time::timeout(Duration::from_secs(10), self.peripheral.connect())
            .await
            .map_err(|_| TransportError::Link("BLE connect() timed out after 10 s".into()))?
            .map_err(|e| TransportError::Link(e.to_string()))
    }

    async fn discover_characteristics(&self) -> Result<Vec<Uuid>, TransportError> {
        // On Linux (bluez-async / D-Bus) connection completion is signalled
        // before the remote GATT cache is populated; discovering too early
        // returns an empty set.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        tokio::time::timeout(Duration::from_secs(15), self.peripheral.discover_services())
            .await
            .map_err(|_| TransportError::Link("discover_services() timed out after 15 s".into()))?
            .map_err(|e| TransportError::Link(e.to_string()))?;

        let uuids: Vec<Uuid> = self
            .peripheral
            .characteristics()
            .into_iter()
            .map(|c| c.uuid)
            .collect();
        info!("{}: {} characteristic(s) discovered", self.id(), uuids.len());
        Ok(uuids)
    }

    async fn write(&self, uuid: Uuid, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        let characteristic = self.characteristic(uuid).ok_or_else(|| TransportError::Write {
            uuid,
            reason: "characteristic not discovered".into(),
        })?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.peripheral
            .write(&characteristic, data, write_type)
            .await
            .map_err(|e| TransportError::Write {
                uuid,
                reason: e.to_string(),
            })
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.characteristic(uuid).ok_or_else(|| TransportError::Read {
            uuid,
            reason: "characteristic not discovered".into(),
        })?;
        self.peripheral
            .read(&characteristic)
            .await
            .map_err(|e| TransportError::Read {
                uuid,
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, uuid: Uuid) -> Result<BoxStream<'static, Vec<u8>>, TransportError> {
        let subscribe_error = |e: btleplug::Error| TransportError::Subscribe {
            uuid,
            reason: e.to_string(),
        };
        let characteristic = self.characteristic(uuid).ok_or_else(|| TransportError::Subscribe {
            uuid,
            reason: "characteristic not discovered".into(),
        })?;
        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(subscribe_error)?;
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(subscribe_error)?;

        let values = notifications.filter_map(move |n| async move {
            if n.uuid == uuid {
                Some(n.value)
            } else {
                None
            }
        });
        Ok(Box::pin(values))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| TransportError::Link(e.to_string()))
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }
}
