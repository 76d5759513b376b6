//! In-memory GATT peripheral emulating the glasses firmware.
//!
//! Enabled for this crate's tests and, through the `test-util` feature,
//! for downstream crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{StreamExt, stream};
use tokio::sync::mpsc;
use uuid::Uuid;

use glasslink_protocol::{Characteristic, NetworkInfo, PairingStatus};

use crate::backend::{
    BackendFuture, GattBackend, GattConnection, NotificationStream, PeerStream,
};
use crate::error::BackendError;
use crate::types::{GattNotification, PeerDescriptor};

struct FakeState {
    values: HashMap<Characteristic, Vec<u8>>,
    expected_code: String,
    api_key: String,
    status: PairingStatus,
    writes: Vec<(Characteristic, Vec<u8>)>,
    subscribers: Vec<mpsc::UnboundedSender<GattNotification>>,
    reachable: bool,
    stalled: bool,
    connected: bool,
    connects: u32,
    join_result: Option<NetworkInfo>,
}

/// A scriptable peripheral.
#[derive(Clone)]
pub struct FakePeripheral {
    state: Arc<Mutex<FakeState>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakePeripheral {
    /// Creates a peripheral that expects `code` and issues `api_key`.
    pub fn new(code: &str, api_key: &str) -> Self {
        let values = HashMap::from([
            (Characteristic::PairingCode, code.as_bytes().to_vec()),
            (Characteristic::Personality, b"friendly".to_vec()),
            (Characteristic::AssistantName, b"Jarvis".to_vec()),
            (
                Characteristic::WakeWord,
                br#"{"keyword":"hey glasses","sensitivity":0.5}"#.to_vec(),
            ),
            (
                Characteristic::Voice,
                br#"{"engine":"gtts","rate":150,"volume":0.6}"#.to_vec(),
            ),
            (Characteristic::StatusMode, b"active".to_vec()),
            (Characteristic::ActionResponse, b"{}".to_vec()),
            (Characteristic::Notes, b"[]".to_vec()),
            (Characteristic::Todos, b"[]".to_vec()),
            (Characteristic::StatusMessage, b"Ready".to_vec()),
            (Characteristic::WifiStatus, b"disconnected".to_vec()),
            (
                Characteristic::NetworkInfo,
                br#"{"ip":"0.0.0.0","subnet":"","gateway":""}"#.to_vec(),
            ),
            (Characteristic::BatteryLevel, vec![85]),
        ]);
        Self {
            state: Arc::new(Mutex::new(FakeState {
                values,
                expected_code: code.to_string(),
                api_key: api_key.to_string(),
                status: PairingStatus::Unpaired,
                writes: Vec::new(),
                subscribers: Vec::new(),
                reachable: true,
                stalled: false,
                connected: false,
                connects: 0,
                join_result: None,
            })),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Overrides a characteristic value.
    pub fn set_value(&self, characteristic: Characteristic, value: Vec<u8>) {
        self.with_state(|s| s.values.insert(characteristic, value));
    }

    /// Sets the address reported once network credentials are written.
    pub fn join_network_as(&self, info: NetworkInfo) {
        self.with_state(|s| s.join_result = Some(info));
    }

    /// Sets the reported network address directly.
    pub fn set_network_info(&self, info: &NetworkInfo) {
        let json = serde_json::to_vec(info).unwrap_or_default();
        self.set_value(Characteristic::NetworkInfo, json);
    }

    /// Whether connection attempts succeed.
    pub fn set_reachable(&self, reachable: bool) {
        self.with_state(|s| s.reachable = reachable);
    }

    /// When stalled, reads and writes never complete.
    pub fn set_stalled(&self, stalled: bool) {
        self.with_state(|s| s.stalled = stalled);
    }

    /// Pushes a notification to every subscriber.
    pub fn notify(&self, characteristic: Characteristic, value: Vec<u8>) {
        self.with_state(|s| {
            s.values.insert(characteristic, value.clone());
            s.subscribers.retain(|tx| {
                tx.send(GattNotification {
                    uuid: characteristic.uuid(),
                    value: value.clone(),
                })
                .is_ok()
            });
        });
    }

    /// Drops the connection as if the peer walked out of range.
    pub fn drop_link(&self) {
        self.with_state(|s| {
            s.connected = false;
            s.subscribers.clear();
        });
    }

    /// All writes received, in order.
    pub fn writes(&self) -> Vec<(Characteristic, Vec<u8>)> {
        self.with_state(|s| s.writes.clone())
    }

    /// Writes received on one characteristic, in order.
    pub fn writes_to(&self, characteristic: Characteristic) -> Vec<Vec<u8>> {
        self.with_state(|s| {
            s.writes
                .iter()
                .filter(|(c, _)| *c == characteristic)
                .map(|(_, v)| v.clone())
                .collect()
        })
    }

    pub fn connect_count(&self) -> u32 {
        self.with_state(|s| s.connects)
    }

    pub fn is_connected(&self) -> bool {
        self.with_state(|s| s.connected)
    }

    /// Highest number of operations observed in flight at once.
    pub fn max_concurrent_ops(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<OpGuard, BackendError> {
        let (stalled, connected) = self.with_state(|s| (s.stalled, s.connected));
        if !connected {
            return Err(BackendError::Disconnected);
        }
        if stalled {
            futures_util::future::pending::<()>().await;
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Give queued callers a chance to run while this op is in flight.
        tokio::task::yield_now().await;
        Ok(OpGuard(self.in_flight.clone()))
    }

    fn handle_read(&self, uuid: Uuid) -> Result<Vec<u8>, BackendError> {
        let characteristic =
            Characteristic::from_uuid(uuid).ok_or(BackendError::MissingCharacteristic(uuid))?;
        self.with_state(|s| match characteristic {
            Characteristic::PairingStatus => Ok(vec![s.status as u8]),
            Characteristic::ApiKey if s.status == PairingStatus::Paired => {
                Ok(s.api_key.as_bytes().to_vec())
            }
            Characteristic::ApiKey => Ok(Vec::new()),
            other => s
                .values
                .get(&other)
                .cloned()
                .ok_or(BackendError::MissingCharacteristic(uuid)),
        })
    }

    fn handle_write(&self, uuid: Uuid, value: &[u8]) -> Result<(), BackendError> {
        let characteristic =
            Characteristic::from_uuid(uuid).ok_or(BackendError::MissingCharacteristic(uuid))?;
        let mut notify = Vec::new();
        self.with_state(|s| {
            s.writes.push((characteristic, value.to_vec()));
            match characteristic {
                Characteristic::PairingStatus => {
                    s.status = if value == s.expected_code.as_bytes() {
                        PairingStatus::Paired
                    } else {
                        PairingStatus::Unpaired
                    };
                }
                Characteristic::CameraControl => {
                    let response = match value {
                        b"photo" => r#"{"success":true,"path":"photos/photo_0001.jpg"}"#,
                        v if v.starts_with(b"video:") => {
                            r#"{"success":true,"path":"videos/video_0001.mp4"}"#
                        }
                        _ => r#"{"success":false,"error":"Unknown command"}"#,
                    };
                    s.values
                        .insert(Characteristic::ActionResponse, response.as_bytes().to_vec());
                }
                Characteristic::SystemControl => {
                    let response = format!(
                        r#"{{"success":true,"message":"{}"}}"#,
                        String::from_utf8_lossy(value)
                    );
                    s.values
                        .insert(Characteristic::ActionResponse, response.into_bytes());
                }
                Characteristic::WifiPassword => {
                    if let Some(info) = s.join_result.clone() {
                        let json = serde_json::to_vec(&info).unwrap_or_default();
                        s.values.insert(Characteristic::NetworkInfo, json);
                        s.values
                            .insert(Characteristic::WifiStatus, b"connected".to_vec());
                        notify.push((Characteristic::WifiStatus, b"connected".to_vec()));
                    }
                }
                Characteristic::WifiSsid => {}
                other => {
                    s.values.insert(other, value.to_vec());
                }
            }
        });
        for (characteristic, value) in notify {
            self.notify(characteristic, value);
        }
        Ok(())
    }
}

struct OpGuard(Arc<AtomicUsize>);

impl Drop for OpGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Backend advertising a fixed set of fake peripherals.
#[derive(Clone, Default)]
pub struct FakeBackend {
    peers: Vec<(PeerDescriptor, FakePeripheral)>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer(mut self, peer: PeerDescriptor, device: FakePeripheral) -> Self {
        self.peers.push((peer, device));
        self
    }
}

impl GattBackend for FakeBackend {
    fn scan(&self) -> BackendFuture<'_, PeerStream> {
        // Each peer advertises twice; the scan never ends on its own.
        let ads: Vec<PeerDescriptor> = self
            .peers
            .iter()
            .chain(self.peers.iter())
            .map(|(p, _)| p.clone())
            .collect();
        Box::pin(async move {
            let stream = stream::iter(ads).chain(stream::pending());
            Ok(Box::pin(stream) as PeerStream)
        })
    }

    fn connect<'a>(
        &'a self,
        peer: &'a PeerDescriptor,
    ) -> BackendFuture<'a, Arc<dyn GattConnection>> {
        Box::pin(async move {
            let device = self
                .peers
                .iter()
                .find(|(p, _)| p.id == peer.id)
                .map(|(_, d)| d.clone())
                .ok_or(BackendError::PeerNotFound)?;
            let reachable = device.with_state(|s| {
                if s.reachable {
                    s.connected = true;
                    s.connects += 1;
                }
                s.reachable
            });
            if !reachable {
                return Err(BackendError::PeerNotFound);
            }
            Ok(Arc::new(FakeConnection { device }) as Arc<dyn GattConnection>)
        })
    }
}

struct FakeConnection {
    device: FakePeripheral,
}

impl GattConnection for FakeConnection {
    fn read(&self, uuid: Uuid) -> BackendFuture<'_, Vec<u8>> {
        Box::pin(async move {
            let _op = self.device.enter().await?;
            self.device.handle_read(uuid)
        })
    }

    fn write<'a>(&'a self, uuid: Uuid, value: &'a [u8]) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let _op = self.device.enter().await?;
            self.device.handle_write(uuid, value)
        })
    }

    fn notifications(&self) -> BackendFuture<'_, NotificationStream> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.device.with_state(|s| s.subscribers.push(tx));
            let stream = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|n| (n, rx))
            });
            Ok(Box::pin(stream) as NotificationStream)
        })
    }

    fn disconnect(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.device.drop_link();
            Ok(())
        })
    }
}
