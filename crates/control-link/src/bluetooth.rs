//! [`GattBackend`] on top of btleplug.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic as BtCharacteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures_util::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

use glasslink_protocol::constants::AUTHENTICATION_SERVICE;

use crate::backend::{
    BackendFuture, GattBackend, GattConnection, NotificationStream, PeerStream,
};
use crate::error::BackendError;
use crate::types::{GattNotification, PeerDescriptor};

fn radio(e: btleplug::Error) -> BackendError {
    match e {
        btleplug::Error::DeviceNotFound => BackendError::PeerNotFound,
        btleplug::Error::NotConnected => BackendError::Disconnected,
        other => BackendError::Radio(other.to_string()),
    }
}

/// Backend using the first Bluetooth adapter of the host.
pub struct BtleplugBackend {
    adapter: Adapter,
    /// Peripheral ids seen while scanning, keyed by their string form.
    known: Arc<Mutex<HashMap<String, PeripheralId>>>,
}

impl BtleplugBackend {
    pub async fn new() -> Result<Self, BackendError> {
        let manager = Manager::new().await.map_err(radio)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(radio)?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Radio("no bluetooth adapter found".into()))?;
        Ok(Self {
            adapter,
            known: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

/// Stops the scan when the peer stream is dropped.
struct ScanGuard {
    adapter: Adapter,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        let adapter = self.adapter.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = adapter.stop_scan().await {
                    debug!(error = %e, "failed to stop scan");
                }
            });
        }
    }
}

impl GattBackend for BtleplugBackend {
    fn scan(&self) -> BackendFuture<'_, PeerStream> {
        Box::pin(async move {
            let events = self.adapter.events().await.map_err(radio)?;
            self.adapter
                .start_scan(ScanFilter {
                    services: vec![AUTHENTICATION_SERVICE],
                })
                .await
                .map_err(radio)?;

            let adapter = self.adapter.clone();
            let known = self.known.clone();
            let guard = ScanGuard {
                adapter: self.adapter.clone(),
            };
            let peers = events
                .filter_map(move |event| {
                    let adapter = adapter.clone();
                    let known = known.clone();
                    async move {
                        let id = match event {
                            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                            _ => return None,
                        };
                        let peripheral = adapter.peripheral(&id).await.ok()?;
                        let props = peripheral.properties().await.ok().flatten();
                        let key = id.to_string();
                        if let Ok(mut k) = known.lock() {
                            k.insert(key.clone(), id);
                        }
                        Some(PeerDescriptor {
                            id: key,
                            name: props.as_ref().and_then(|p| p.local_name.clone()),
                            rssi: props.and_then(|p| p.rssi),
                        })
                    }
                })
                .map(move |peer| {
                    let _ = &guard;
                    peer
                });
            Ok(Box::pin(peers) as PeerStream)
        })
    }

    fn connect<'a>(
        &'a self,
        peer: &'a PeerDescriptor,
    ) -> BackendFuture<'a, Arc<dyn GattConnection>> {
        Box::pin(async move {
            let id = self
                .known
                .lock()
                .ok()
                .and_then(|k| k.get(&peer.id).cloned())
                .ok_or(BackendError::PeerNotFound)?;
            let peripheral = self.adapter.peripheral(&id).await.map_err(radio)?;
            peripheral.connect().await.map_err(radio)?;
            peripheral.discover_services().await.map_err(radio)?;

            let characteristics: HashMap<Uuid, BtCharacteristic> = peripheral
                .characteristics()
                .into_iter()
                .map(|c| (c.uuid, c))
                .collect();
            for c in characteristics.values() {
                if c.properties.contains(CharPropFlags::NOTIFY)
                    && let Err(e) = peripheral.subscribe(c).await
                {
                    warn!(uuid = %c.uuid, error = %e, "subscribe failed");
                }
            }
            debug!(peer = %peer.id, count = characteristics.len(), "services resolved");

            Ok(Arc::new(BtleplugConnection {
                adapter: self.adapter.clone(),
                id,
                peripheral,
                characteristics,
            }) as Arc<dyn GattConnection>)
        })
    }
}

struct BtleplugConnection {
    adapter: Adapter,
    id: PeripheralId,
    peripheral: Peripheral,
    characteristics: HashMap<Uuid, BtCharacteristic>,
}

impl BtleplugConnection {
    fn characteristic(&self, uuid: Uuid) -> Result<&BtCharacteristic, BackendError> {
        self.characteristics
            .get(&uuid)
            .ok_or(BackendError::MissingCharacteristic(uuid))
    }
}

impl GattConnection for BtleplugConnection {
    fn read(&self, uuid: Uuid) -> BackendFuture<'_, Vec<u8>> {
        Box::pin(async move {
            let c = self.characteristic(uuid)?;
            self.peripheral.read(c).await.map_err(radio)
        })
    }

    fn write<'a>(&'a self, uuid: Uuid, value: &'a [u8]) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let c = self.characteristic(uuid)?;
            self.peripheral
                .write(c, value, WriteType::WithResponse)
                .await
                .map_err(radio)
        })
    }

    fn notifications(&self) -> BackendFuture<'_, NotificationStream> {
        Box::pin(async move {
            let values = self.peripheral.notifications().await.map_err(radio)?;
            let mut events = self.adapter.events().await.map_err(radio)?;
            let id = self.id.clone();
            let gone = async move {
                while let Some(event) = events.next().await {
                    if let CentralEvent::DeviceDisconnected(d) = event
                        && d == id
                    {
                        break;
                    }
                }
            };
            let stream = values
                .map(|n| GattNotification {
                    uuid: n.uuid,
                    value: n.value,
                })
                .take_until(gone);
            Ok(Box::pin(stream) as NotificationStream)
        })
    }

    fn disconnect(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move { self.peripheral.disconnect().await.map_err(radio) })
    }
}
