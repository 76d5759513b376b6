//! Control link over a GATT channel.
//!
//! One channel to one peer at a time. Every operation holds the channel
//! lock for its whole exchange, so callers queue in arrival order and at
//! most one operation is in flight.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::ready;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use glasslink_protocol::constants::{DEFAULT_CONTROL_OP_TIMEOUT, MAX_SYNC_PAYLOAD};
use glasslink_protocol::{
    ActionResponse, CameraCommand, Characteristic, DecodeError, NetworkInfo, NetworkStatus, Note,
    PairingStatus, Setting, SettingValue, SystemCommand, Todo, Validate, decode_json,
    is_valid_pairing_code,
};

use crate::backend::{BackendFuture, GattBackend, GattConnection, NotificationStream, PeerStream};
use crate::error::ControlLinkError;
use crate::types::{ControlEvent, PeerDescriptor};

/// An open channel.
struct Channel {
    peer: PeerDescriptor,
    conn: Arc<dyn GattConnection>,
    generation: u64,
    /// Set once the peer accepted a pairing code on this channel.
    verified: bool,
    forwarder: CancellationToken,
}

/// Control link to a single peer.
pub struct ControlLink {
    backend: Arc<dyn GattBackend>,
    channel: Arc<Mutex<Option<Channel>>>,
    /// Mirror of the open peer, readable without queueing behind operations.
    peer: Arc<std::sync::Mutex<Option<PeerDescriptor>>>,
    generation: AtomicU64,
    op_timeout: Duration,
    events_tx: mpsc::Sender<ControlEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ControlEvent>>>,
}

impl ControlLink {
    pub fn new(backend: Arc<dyn GattBackend>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            backend,
            channel: Arc::new(Mutex::new(None)),
            peer: Arc::new(std::sync::Mutex::new(None)),
            generation: AtomicU64::new(0),
            op_timeout: DEFAULT_CONTROL_OP_TIMEOUT,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Sets the per-operation timeout.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ControlEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Returns `true` while a channel is open.
    pub fn is_open(&self) -> bool {
        self.peer().is_some()
    }

    /// Returns the peer of the open channel.
    pub fn peer(&self) -> Option<PeerDescriptor> {
        self.peer.lock().ok().and_then(|p| p.clone())
    }

    /// Scans for peers for at most `timeout`.
    ///
    /// The returned stream is lazy, yields each peer once and ends when the
    /// window closes. Call again to rescan.
    pub async fn discover(&self, timeout: Duration) -> Result<PeerStream, ControlLinkError> {
        let advertisements = self.backend.scan().await?;
        let mut seen = HashSet::new();
        let peers = advertisements
            .take_until(tokio::time::sleep(timeout))
            .filter(move |peer| ready(seen.insert(peer.id.clone())));
        debug!(timeout_ms = timeout.as_millis() as u64, "control link scan started");
        Ok(Box::pin(peers))
    }

    /// Opens a channel to `peer`, replacing any open channel.
    pub async fn open(&self, peer: &PeerDescriptor) -> Result<(), ControlLinkError> {
        let mut slot = self.channel.lock().await;
        if let Some(old) = slot.take() {
            self.set_peer(None);
            self.teardown(old).await;
        }

        let conn = match tokio::time::timeout(self.op_timeout, self.backend.connect(peer)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(peer = %peer.id, "connect timed out");
                return Err(ControlLinkError::LinkTimeout);
            }
        };
        let notifications = match self.timed("subscribe", conn.notifications()).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = tokio::time::timeout(self.op_timeout, conn.disconnect()).await;
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let forwarder = CancellationToken::new();
        tokio::spawn(forward_notifications(
            notifications,
            peer.id.clone(),
            generation,
            forwarder.clone(),
            self.events_tx.clone(),
            self.channel.clone(),
            self.peer.clone(),
        ));

        *slot = Some(Channel {
            peer: peer.clone(),
            conn,
            generation,
            verified: false,
            forwarder,
        });
        self.set_peer(Some(peer.clone()));
        info!(peer = %peer.id, name = ?peer.name, "control link open");
        Ok(())
    }

    /// Closes the open channel. No event is emitted.
    pub async fn close(&self) {
        let mut slot = self.channel.lock().await;
        self.set_peer(None);
        if let Some(channel) = slot.take() {
            info!(peer = %channel.peer.id, "closing control link");
            self.teardown(channel).await;
        }
    }

    // -----------------------------------------------------------------------
    // Raw access
    // -----------------------------------------------------------------------

    /// Reads a characteristic.
    pub async fn read(&self, characteristic: Characteristic) -> Result<Vec<u8>, ControlLinkError> {
        let channel = self.acquire().await?;
        self.timed("read", channel.conn.read(characteristic.uuid()))
            .await
    }

    /// Writes a characteristic.
    pub async fn write(
        &self,
        characteristic: Characteristic,
        value: &[u8],
    ) -> Result<(), ControlLinkError> {
        let channel = self.acquire().await?;
        self.timed("write", channel.conn.write(characteristic.uuid(), value))
            .await
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    /// Reads the numeric code currently displayed or spoken by the peer.
    pub async fn read_pairing_code(&self) -> Result<String, ControlLinkError> {
        let raw = self.read(Characteristic::PairingCode).await?;
        let code = String::from_utf8(raw).map_err(DecodeError::from)?;
        let code = code.trim();
        if !is_valid_pairing_code(code) {
            return Err(DecodeError::invalid("pairing code", format!("{code:?}")).into());
        }
        Ok(code.to_string())
    }

    /// Submits a pairing code and reads back the pairing status.
    ///
    /// Returns `true` if the peer reports itself paired.
    pub async fn verify_pairing_code(&self, code: &str) -> Result<bool, ControlLinkError> {
        let mut channel = self.acquire().await?;
        let status = Characteristic::PairingStatus.uuid();
        self.timed("verify_pairing_code", channel.conn.write(status, code.as_bytes()))
            .await?;
        let raw = self
            .timed("verify_pairing_code", channel.conn.read(status))
            .await?;
        let status = PairingStatus::from_bytes(&raw)?;
        let accepted = status == PairingStatus::Paired;
        channel.verified = accepted;
        debug!(peer = %channel.peer.id, ?status, accepted, "pairing code submitted");
        Ok(accepted)
    }

    /// Reads the API key issued after a successful verification.
    pub async fn read_credential(&self) -> Result<String, ControlLinkError> {
        let channel = self.acquire().await?;
        if !channel.verified {
            return Err(ControlLinkError::NotPaired);
        }
        let raw = self
            .timed("read_credential", channel.conn.read(Characteristic::ApiKey.uuid()))
            .await?;
        let key = String::from_utf8(raw).map_err(DecodeError::from)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ControlLinkError::NotPaired);
        }
        Ok(key.to_string())
    }

    // -----------------------------------------------------------------------
    // Network config
    // -----------------------------------------------------------------------

    /// Writes network-join credentials. Writing the secret starts the join.
    pub async fn push_network_credentials(
        &self,
        ssid: &str,
        secret: &str,
    ) -> Result<(), ControlLinkError> {
        if ssid.is_empty() || ssid.len() > 32 {
            return Err(DecodeError::invalid("ssid", format!("{} bytes", ssid.len())).into());
        }
        let channel = self.acquire().await?;
        self.timed(
            "push_network_credentials",
            channel.conn.write(Characteristic::WifiSsid.uuid(), ssid.as_bytes()),
        )
        .await?;
        self.timed(
            "push_network_credentials",
            channel
                .conn
                .write(Characteristic::WifiPassword.uuid(), secret.as_bytes()),
        )
        .await?;
        info!(peer = %channel.peer.id, ssid, "network credentials pushed");
        Ok(())
    }

    pub async fn read_network_info(&self) -> Result<NetworkInfo, ControlLinkError> {
        let raw = self.read(Characteristic::NetworkInfo).await?;
        Ok(decode_json(&raw)?)
    }

    pub async fn read_network_status(&self) -> Result<NetworkStatus, ControlLinkError> {
        let raw = self.read(Characteristic::WifiStatus).await?;
        Ok(NetworkStatus::from_bytes(&raw)?)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    pub async fn read_setting(&self, setting: Setting) -> Result<SettingValue, ControlLinkError> {
        let raw = self.read(setting.characteristic()).await?;
        Ok(SettingValue::from_control_bytes(setting, &raw)?)
    }

    pub async fn write_setting(&self, value: &SettingValue) -> Result<(), ControlLinkError> {
        value.validate()?;
        let bytes = value.to_control_bytes()?;
        self.write(value.setting().characteristic(), &bytes).await
    }

    // -----------------------------------------------------------------------
    // Quick actions
    // -----------------------------------------------------------------------

    /// Sends a camera command and returns the action response.
    ///
    /// Video commands get the recording length added to the timeout.
    pub async fn send_camera_command(
        &self,
        command: CameraCommand,
    ) -> Result<ActionResponse, ControlLinkError> {
        let extra = match command {
            CameraCommand::Photo => Duration::ZERO,
            CameraCommand::Video { seconds } => Duration::from_secs(u64::from(seconds)),
        };
        self.quick_action(Characteristic::CameraControl, command.to_string(), extra)
            .await
    }

    /// Sends a system command and returns the action response.
    pub async fn send_system_command(
        &self,
        command: SystemCommand,
    ) -> Result<ActionResponse, ControlLinkError> {
        self.quick_action(
            Characteristic::SystemControl,
            command.to_string(),
            Duration::ZERO,
        )
        .await
    }

    async fn quick_action(
        &self,
        target: Characteristic,
        command: String,
        extra: Duration,
    ) -> Result<ActionResponse, ControlLinkError> {
        let channel = self.acquire().await?;
        let limit = self.op_timeout + extra;
        let exchange = async {
            channel.conn.write(target.uuid(), command.as_bytes()).await?;
            channel.conn.read(Characteristic::ActionResponse.uuid()).await
        };
        let raw = match tokio::time::timeout(limit, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(peer = %channel.peer.id, %command, "quick action timed out");
                return Err(ControlLinkError::LinkTimeout);
            }
        };
        debug!(peer = %channel.peer.id, %command, "quick action completed");
        Ok(decode_json(&raw)?)
    }

    // -----------------------------------------------------------------------
    // Data sync
    // -----------------------------------------------------------------------

    pub async fn read_notes(&self) -> Result<Vec<Note>, ControlLinkError> {
        let raw = self.read(Characteristic::Notes).await?;
        Ok(decode_json(&raw)?)
    }

    pub async fn write_notes(&self, notes: &[Note]) -> Result<(), ControlLinkError> {
        let bytes = encode_sync(notes)?;
        self.write(Characteristic::Notes, &bytes).await
    }

    pub async fn read_todos(&self) -> Result<Vec<Todo>, ControlLinkError> {
        let raw = self.read(Characteristic::Todos).await?;
        Ok(decode_json(&raw)?)
    }

    pub async fn write_todos(&self, todos: &[Todo]) -> Result<(), ControlLinkError> {
        let bytes = encode_sync(todos)?;
        self.write(Characteristic::Todos, &bytes).await
    }

    /// Reads the battery level in percent.
    pub async fn read_battery_level(&self) -> Result<u8, ControlLinkError> {
        let raw = self.read(Characteristic::BatteryLevel).await?;
        match raw.as_slice() {
            [level] if *level <= 100 => Ok(*level),
            other => Err(DecodeError::invalid("battery level", format!("{other:?}")).into()),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Waits for the channel, queueing behind in-flight operations.
    async fn acquire(&self) -> Result<MappedMutexGuard<'_, Channel>, ControlLinkError> {
        let slot = self.channel.lock().await;
        MutexGuard::try_map(slot, |slot| slot.as_mut())
            .map_err(|_| ControlLinkError::LinkUnavailable)
    }

    async fn timed<T>(
        &self,
        op: &'static str,
        fut: BackendFuture<'_, T>,
    ) -> Result<T, ControlLinkError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(op, timeout_ms = self.op_timeout.as_millis() as u64, "control operation timed out");
                Err(ControlLinkError::LinkTimeout)
            }
        }
    }

    async fn teardown(&self, channel: Channel) {
        channel.forwarder.cancel();
        match tokio::time::timeout(self.op_timeout, channel.conn.disconnect()).await {
            Ok(Ok(())) => debug!(peer = %channel.peer.id, "peer disconnected"),
            Ok(Err(e)) => debug!(peer = %channel.peer.id, error = %e, "disconnect failed"),
            Err(_) => debug!(peer = %channel.peer.id, "disconnect timed out"),
        }
    }

    fn set_peer(&self, peer: Option<PeerDescriptor>) {
        if let Ok(mut guard) = self.peer.lock() {
            *guard = peer;
        }
    }
}

fn encode_sync<T: serde::Serialize>(items: &[T]) -> Result<Vec<u8>, DecodeError> {
    let bytes = serde_json::to_vec(items)?;
    if bytes.len() > MAX_SYNC_PAYLOAD {
        return Err(DecodeError::TooLarge {
            len: bytes.len(),
            limit: MAX_SYNC_PAYLOAD,
        });
    }
    Ok(bytes)
}

/// Forwards peer notifications until the channel closes.
///
/// If the stream ends without `cancel` firing, the peer dropped: the
/// channel is cleared and [`ControlEvent::Disconnected`] emitted.
async fn forward_notifications(
    mut notifications: NotificationStream,
    peer_id: String,
    generation: u64,
    cancel: CancellationToken,
    events_tx: mpsc::Sender<ControlEvent>,
    channel: Arc<Mutex<Option<Channel>>>,
    peer: Arc<std::sync::Mutex<Option<PeerDescriptor>>>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            next = notifications.next() => match next {
                Some(n) => {
                    let Some(characteristic) = Characteristic::from_uuid(n.uuid) else {
                        trace!(uuid = %n.uuid, "ignoring notification from unknown characteristic");
                        continue;
                    };
                    trace!(?characteristic, len = n.value.len(), "notification");
                    let event = ControlEvent::ValueChanged { characteristic, value: n.value };
                    if events_tx.send(event).await.is_err() {
                        trace!("control event receiver dropped");
                    }
                }
                None => break,
            }
        }
    }

    if cancel.is_cancelled() {
        return;
    }
    {
        let mut slot = channel.lock().await;
        if slot.as_ref().is_some_and(|c| c.generation == generation) {
            *slot = None;
            if let Ok(mut p) = peer.lock() {
                *p = None;
            }
        } else {
            return;
        }
    }
    warn!(peer = %peer_id, "control link dropped");
    let _ = events_tx
        .send(ControlEvent::Disconnected { peer_id })
        .await;
}
