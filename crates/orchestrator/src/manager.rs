//! Connection orchestrator.
//!
//! Presents the control link and the data link as one logical connection.
//! Owns the pairing handshake, the credential, the connection state and the
//! choice of link for every operation. Decisions are taken under a single
//! async mutex around [`Core`]; link I/O runs outside it and only the commit
//! steps re-enter it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::SubsecRound;
use futures_util::StreamExt;
use futures_util::future::ready;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use glasslink_control_link::{ControlEvent, ControlLink, ControlLinkError, PeerDescriptor, PeerStream};
use glasslink_data_link::{
    DataEndpoint, DataLink, DataLinkConnector, DataLinkError, DeviceApi, MediaKind,
};
use glasslink_protocol::constants::{NOTE_DATE_FORMAT, SYNC_RECENT_ITEMS};
use glasslink_protocol::{
    CameraCommand, Characteristic, DecodeError, NetworkStatus, Note, PairingStatus, Setting,
    SettingValue, Settings, Todo, decode_json, is_valid_pairing_code,
};

use crate::config::OrchestratorConfig;
use crate::error::{ConnectionError, PairingFailure};
use crate::operation::{Operation, OperationClass, OperationOutput};
use crate::pairing::PairingSession;
use crate::store::CredentialStore;
use crate::types::{
    ConnectionEvent, ConnectionState, Credential, Device, PeerNotification, PreferredTransport,
    ReconnectOutcome, StateEvent,
};

/// State guarded by the orchestrator's single lock.
struct Core {
    state: ConnectionState,
    session: Option<PairingSession>,
    credential: Option<Credential>,
    /// Present iff `state` is `DataAvailable`.
    data: Option<Arc<dyn DataLink>>,
}

enum Route {
    Control,
    Data(Arc<dyn DataLink>),
}

/// Single logical connection to the paired glasses.
pub struct Orchestrator {
    control: Arc<ControlLink>,
    connector: Arc<dyn DataLinkConnector>,
    store: Arc<dyn CredentialStore>,
    config: OrchestratorConfig,
    core: Mutex<Core>,
    /// Held by pairing and by anything that opens the control link, so a
    /// background reconnect never replaces a channel mid-handshake.
    link_turn: Mutex<()>,
    /// Cancelled and replaced by `disconnect()` and `unpair()`.
    epoch: std::sync::Mutex<CancellationToken>,
    shutdown: CancellationToken,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

impl Orchestrator {
    /// Creates an orchestrator, loading any stored credential.
    pub fn new(
        control: Arc<ControlLink>,
        connector: Arc<dyn DataLinkConnector>,
        store: Arc<dyn CredentialStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let credential = match store.read_all() {
            Ok(entries) => Credential::from_entries(&entries),
            Err(e) => {
                warn!(error = %e, "failed to load stored credential");
                None
            }
        };
        let state = if credential.is_some() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Unpaired
        };
        if let Some(cred) = &credential {
            info!(device = %cred.device_id, "loaded stored credential");
        }

        let (events_tx, events_rx) = mpsc::channel(64);
        let shutdown = CancellationToken::new();
        Self {
            control,
            connector,
            store,
            config,
            core: Mutex::new(Core {
                state,
                session: None,
                credential,
                data: None,
            }),
            link_turn: Mutex::new(()),
            epoch: std::sync::Mutex::new(shutdown.child_token()),
            shutdown,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events_rx.lock().await.take()
    }

    pub async fn state(&self) -> ConnectionState {
        self.core.lock().await.state
    }

    pub async fn credential(&self) -> Option<Credential> {
        self.core.lock().await.credential.clone()
    }

    pub async fn pairing_session(&self) -> Option<PairingSession> {
        self.core.lock().await.session.clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Starts the event loop and one background reconnect attempt.
    pub async fn start(self: &Arc<Self>) {
        let Some(control_events) = self.control.take_events().await else {
            warn!("orchestrator already started");
            return;
        };

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_events(control_events).await });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.reconnect().await;
        });
        info!("orchestrator started");
    }

    /// Stops the event loop and drops both links. The credential is kept.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.disconnect().await;
        info!("orchestrator shut down");
    }

    // -----------------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------------

    /// Scans for peers for at most `timeout`.
    pub async fn discover(&self, timeout: Duration) -> Result<PeerStream, ConnectionError> {
        Ok(self.control.discover(timeout).await?)
    }

    /// Opens the control link to `peer`.
    pub async fn open(&self, peer: &PeerDescriptor) -> Result<(), ConnectionError> {
        let _turn = self.link_turn.lock().await;
        self.control.open(peer).await?;
        let mut core = self.core.lock().await;
        let paired = core.credential.is_some();
        self.apply(&mut core, StateEvent::ControlOpened { paired });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pairing
    // -----------------------------------------------------------------------

    /// Starts a pairing session and returns the code shown by the peer.
    pub async fn begin_pairing(&self) -> Result<String, ConnectionError> {
        let _turn = self.link_turn.lock().await;
        let token = self.epoch();
        self.ensure_session().await?;

        let code = match cancellable(&token, self.control.read_pairing_code()).await? {
            Ok(code) => code,
            Err(e) => return Err(self.control_failed(e.into()).await),
        };

        if let Some(session) = self.core.lock().await.session.as_mut() {
            session.expected_code = Some(code.clone());
        }
        self.emit(ConnectionEvent::PairingCode { code: code.clone() });
        Ok(code)
    }

    /// Submits a pairing code.
    ///
    /// On success the credential is persisted, the state becomes
    /// `ControlOnly` and one data link promotion is attempted before
    /// returning.
    pub async fn pair(&self, code: &str) -> Result<Device, ConnectionError> {
        let _turn = self.link_turn.lock().await;
        let token = self.epoch();
        self.ensure_session().await?;

        let code = code.trim();
        if !is_valid_pairing_code(code) {
            debug!("malformed pairing code rejected locally");
            return Err(self.reject_attempt().await);
        }

        let accepted = match cancellable(&token, self.control.verify_pairing_code(code)).await? {
            Ok(accepted) => accepted,
            Err(ControlLinkError::LinkTimeout) => {
                warn!("pairing verification timed out");
                return Err(ConnectionError::PairingFailed(PairingFailure::Timeout));
            }
            Err(e) => return Err(self.control_failed(e.into()).await),
        };
        if !accepted {
            return Err(self.reject_attempt().await);
        }

        let api_key = match cancellable(&token, self.control.read_credential()).await? {
            Ok(key) => key,
            Err(e) => return Err(self.control_failed(e.into()).await),
        };
        let ip_address = match cancellable(&token, self.control.read_network_info()).await? {
            Ok(info) => info.address().map(|a| a.to_string()),
            Err(e) => {
                debug!(error = %e, "network info unavailable during pairing");
                None
            }
        };
        let peer = self.control.peer().ok_or(ConnectionError::LinkUnavailable)?;

        let credential = Credential {
            device_id: peer.id.clone(),
            api_key,
            ip_address,
            preferred_transport: PreferredTransport::Control,
        };
        let device = Device {
            device_id: peer.id,
            display_name: peer.name,
        };

        {
            let mut core = self.core.lock().await;
            if token.is_cancelled() {
                return Err(ConnectionError::Cancelled);
            }
            if core.state != ConnectionState::Pairing {
                return Err(ConnectionError::LinkUnavailable);
            }
            if let Err(e) = self.store.write_all(&credential.to_entries()) {
                warn!(error = %e, "failed to persist credential");
                return Err(ConnectionError::CredentialPersistenceFailed(e.to_string()));
            }
            core.credential = Some(credential);
            self.apply(&mut core, StateEvent::PairingSucceeded);
        }

        info!(device = %device.device_id, name = ?device.display_name, "paired");
        self.emit(ConnectionEvent::Paired {
            device: device.clone(),
        });
        self.promote_within(token).await;
        Ok(device)
    }

    /// Creates the pairing session if there is none.
    async fn ensure_session(&self) -> Result<(), ConnectionError> {
        let mut core = self.core.lock().await;
        if core.credential.is_some() {
            return Err(ConnectionError::AlreadyPaired);
        }
        if !self.control.is_open() {
            return Err(ConnectionError::LinkUnavailable);
        }
        if core.session.is_none() {
            core.session = Some(PairingSession::new(self.config.pairing_attempts));
            self.apply(&mut core, StateEvent::PairingStarted);
        }
        Ok(())
    }

    async fn reject_attempt(&self) -> ConnectionError {
        let mut core = self.core.lock().await;
        let Some(session) = core.session.as_mut() else {
            return ConnectionError::Cancelled;
        };
        if !session.record_rejection() {
            let attempts_remaining = session.attempts_remaining();
            warn!(attempts_remaining, "pairing code rejected");
            return ConnectionError::PairingFailed(PairingFailure::InvalidCode {
                attempts_remaining,
            });
        }

        core.session = None;
        self.apply(&mut core, StateEvent::PairingAbandoned);
        drop(core);

        warn!("pairing attempts exhausted, closing control link");
        self.control.close().await;
        ConnectionError::PairingFailed(PairingFailure::AttemptsExhausted)
    }

    // -----------------------------------------------------------------------
    // Network and promotion
    // -----------------------------------------------------------------------

    /// Sends network-join credentials to the paired glasses.
    pub async fn provision_network(&self, ssid: &str, secret: &str) -> Result<(), ConnectionError> {
        {
            let core = self.core.lock().await;
            if core.credential.is_none() {
                return Err(ConnectionError::NotPaired);
            }
            if !matches!(
                core.state,
                ConnectionState::ControlOnly | ConnectionState::DataAvailable
            ) {
                return Err(ConnectionError::LinkUnavailable);
            }
        }
        match self.control.push_network_credentials(ssid, secret).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.control_failed(e.into()).await),
        }
    }

    /// Tries to bring up the data link at the credential's address.
    ///
    /// Failures are logged, not returned. Returns `true` when the state is
    /// `DataAvailable` afterwards.
    pub async fn attempt_data_promotion(&self) -> bool {
        self.promote_within(self.epoch()).await
    }

    /// Promotion that gives up once `token` is cancelled.
    async fn promote_within(&self, token: CancellationToken) -> bool {
        let endpoint = {
            let core = self.core.lock().await;
            if core.state == ConnectionState::DataAvailable {
                return true;
            }
            let Some(cred) = &core.credential else {
                return false;
            };
            let Some(address) = &cred.ip_address else {
                debug!("no address known for the data link");
                return false;
            };
            DataEndpoint::new(address.clone(), cred.api_key.clone())
                .with_port(self.config.data_port)
                .with_timeout(self.config.request_timeout())
        };
        let address = endpoint.address.clone();

        let link = match self.connector.connect(endpoint) {
            Ok(link) => link,
            Err(e) => {
                warn!(%address, error = %e, "cannot build data link");
                return false;
            }
        };
        match cancellable(&token, link.probe()).await {
            Err(_) => return false,
            Ok(Err(e)) => {
                info!(%address, error = %e, "data link probe failed");
                return false;
            }
            Ok(Ok(())) => {}
        }

        let mut core = self.core.lock().await;
        if token.is_cancelled() || core.credential.is_none() {
            return false;
        }
        core.data = Some(link);
        self.apply(&mut core, StateEvent::DataPromoted);
        if core.state != ConnectionState::DataAvailable {
            core.data = None;
            return false;
        }
        if let Some(cred) = core.credential.as_mut() {
            cred.preferred_transport = PreferredTransport::Data;
            if let Err(e) = self.store.write_all(&cred.to_entries()) {
                warn!(error = %e, "failed to persist preferred transport");
            }
        }
        info!(%address, "data link promoted");
        true
    }

    /// Re-reads the peer's address into the credential. Returns `true` if
    /// it changed.
    async fn refresh_address(&self) -> bool {
        let info = match self.control.read_network_info().await {
            Ok(info) => info,
            Err(e) => {
                debug!(error = %e, "cannot read network info");
                return false;
            }
        };
        let Some(address) = info.address().map(|a| a.to_string()) else {
            return false;
        };

        let mut core = self.core.lock().await;
        let Some(cred) = core.credential.as_mut() else {
            return false;
        };
        if cred.ip_address.as_deref() == Some(address.as_str()) {
            return false;
        }
        info!(%address, "peer address changed");
        cred.ip_address = Some(address);
        if let Err(e) = self.store.write_all(&cred.to_entries()) {
            warn!(error = %e, "failed to persist peer address");
        }
        true
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Runs an operation on whichever link the routing policy selects.
    pub async fn execute(&self, op: Operation) -> Result<OperationOutput, ConnectionError> {
        if let Operation::RecordVideo { seconds: 0 } = op {
            return Err(DecodeError::invalid("seconds", "zero-length recording").into());
        }

        match self.route(&op).await? {
            Route::Control => {
                debug!(op = op.name(), "routing over control link");
                match self.run_control(&op).await {
                    Ok(output) => Ok(output),
                    Err(e) => Err(self.control_failed(e).await),
                }
            }
            Route::Data(link) => {
                debug!(op = op.name(), "routing over data link");
                let api = DeviceApi::new(Arc::clone(&link));
                match run_data(&api, &op).await {
                    Ok(output) => Ok(output),
                    Err(e) => Err(self.data_failed(&link, e).await),
                }
            }
        }
    }

    async fn route(&self, op: &Operation) -> Result<Route, ConnectionError> {
        let core = self.core.lock().await;
        let data = match core.state {
            ConnectionState::DataAvailable => core.data.clone(),
            _ => None,
        };
        match op.class() {
            OperationClass::Data => data.map(Route::Data).ok_or(ConnectionError::TransportUnavailable),
            OperationClass::Control => {
                if core.credential.is_none() {
                    Err(ConnectionError::NotPaired)
                } else if self.control.is_open() {
                    Ok(Route::Control)
                } else {
                    data.map(Route::Data).ok_or(ConnectionError::LinkUnavailable)
                }
            }
        }
    }

    async fn run_control(&self, op: &Operation) -> Result<OperationOutput, ConnectionError> {
        let link = &self.control;
        Ok(match op {
            Operation::ReadSetting(setting) => OperationOutput::Setting(link.read_setting(*setting).await?),
            Operation::WriteSetting(value) => {
                link.write_setting(value).await?;
                OperationOutput::Done
            }
            Operation::CapturePhoto => {
                OperationOutput::Action(link.send_camera_command(CameraCommand::Photo).await?)
            }
            Operation::RecordVideo { seconds } => OperationOutput::Action(
                link.send_camera_command(CameraCommand::Video { seconds: *seconds })
                    .await?,
            ),
            Operation::System(command) => {
                OperationOutput::Action(link.send_system_command(*command).await?)
            }
            Operation::RecentNotes => OperationOutput::Notes(link.read_notes().await?),
            Operation::RecentTodos => OperationOutput::Todos(link.read_todos().await?),
            Operation::AddNote { text } => {
                let mut notes = link.read_notes().await?;
                let now = chrono::Local::now().naive_local().trunc_subsecs(0);
                notes.push(Note {
                    id: next_id(notes.iter().map(|n| n.id))?,
                    text: text.clone(),
                    timestamp: now,
                    date: now.format(NOTE_DATE_FORMAT).to_string(),
                });
                keep_recent(&mut notes);
                link.write_notes(&notes).await?;
                OperationOutput::Done
            }
            Operation::AddTodo { task, priority } => {
                let mut todos = link.read_todos().await?;
                todos.push(Todo {
                    id: next_id(todos.iter().map(|t| t.id))?,
                    task: task.clone(),
                    priority: *priority,
                    created: chrono::Local::now().naive_local().trunc_subsecs(0),
                    completed: false,
                });
                keep_recent(&mut todos);
                link.write_todos(&todos).await?;
                OperationOutput::Done
            }
            data_op => return Err(ConnectionError::Unsupported(data_op.name())),
        })
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Drops both links and any pairing session. The credential is kept.
    pub async fn disconnect(&self) {
        self.cancel_epoch();
        self.control.close().await;
        let mut core = self.core.lock().await;
        core.session = None;
        core.data = None;
        self.apply(&mut core, StateEvent::Disconnect);
        info!("disconnected");
    }

    /// Forgets the paired glasses.
    ///
    /// Always ends in `Unpaired`; an error means the stored credential could
    /// not be removed.
    pub async fn unpair(&self) -> Result<(), ConnectionError> {
        self.cancel_epoch();
        self.control.close().await;
        let mut core = self.core.lock().await;
        core.session = None;
        core.data = None;
        core.credential = None;
        let cleared = self.store.clear();
        self.apply(&mut core, StateEvent::Unpair);
        drop(core);

        match cleared {
            Ok(()) => {
                info!("unpaired");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to clear stored credential");
                Err(ConnectionError::CredentialPersistenceFailed(e.to_string()))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reconnect
    // -----------------------------------------------------------------------

    /// Makes one reconnection attempt.
    ///
    /// Tries the data link first when an address is known, then scans for
    /// the paired peer (or the strongest peer when unpaired) and opens the
    /// control link. Never loops; see
    /// [`ReconnectConfig`](crate::ReconnectConfig) for caller-side backoff.
    pub async fn reconnect(&self) -> ReconnectOutcome {
        let outcome = self.reconnect_once().await;
        info!(?outcome, "reconnect attempt finished");
        self.emit(ConnectionEvent::Reconnect(outcome));
        outcome
    }

    async fn reconnect_once(&self) -> ReconnectOutcome {
        let token = self.epoch();
        let (credential, state) = {
            let core = self.core.lock().await;
            (core.credential.clone(), core.state)
        };
        if state == ConnectionState::DataAvailable {
            return ReconnectOutcome::DataLink;
        }

        let has_address = credential.as_ref().is_some_and(|c| c.ip_address.is_some());
        if has_address && self.promote_within(token.clone()).await {
            return ReconnectOutcome::DataLink;
        }
        if token.is_cancelled() {
            return ReconnectOutcome::Cancelled;
        }
        if self.control.is_open() {
            return ReconnectOutcome::ControlLink;
        }

        let wanted = credential.as_ref().map(|c| c.device_id.as_str());
        let peer = match cancellable(&token, self.find_peer(wanted)).await {
            Err(_) => return ReconnectOutcome::Cancelled,
            Ok(None) => return ReconnectOutcome::Unreachable,
            Ok(Some(peer)) => peer,
        };

        {
            let _turn = self.link_turn.lock().await;
            if token.is_cancelled() {
                return ReconnectOutcome::Cancelled;
            }
            // The caller may have opened a channel while we were scanning.
            if self.control.is_open() {
                debug!("control link opened during scan, keeping it");
                return ReconnectOutcome::ControlLink;
            }
            if let Err(e) = self.control.open(&peer).await {
                info!(peer = %peer.id, error = %e, "peer unreachable");
                return ReconnectOutcome::Unreachable;
            }

            let mut core = self.core.lock().await;
            if token.is_cancelled() {
                drop(core);
                self.control.close().await;
                return ReconnectOutcome::Cancelled;
            }
            let paired = core.credential.is_some();
            self.apply(&mut core, StateEvent::ControlOpened { paired });
        }

        if credential.is_some() && self.refresh_address().await && self.promote_within(token).await {
            return ReconnectOutcome::DataLink;
        }
        ReconnectOutcome::ControlLink
    }

    async fn find_peer(&self, wanted: Option<&str>) -> Option<PeerDescriptor> {
        let peers = match self.control.discover(self.config.discovery_timeout()).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(error = %e, "scan failed");
                return None;
            }
        };
        match wanted {
            Some(id) => peers.filter(|p| ready(p.id == id)).next().await,
            None => peers
                .collect::<Vec<_>>()
                .await
                .into_iter()
                .max_by_key(|p| p.rssi.unwrap_or(i16::MIN)),
        }
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    async fn run_events(self: Arc<Self>, mut control_events: mpsc::Receiver<ControlEvent>) {
        let mut health = self.config.health_interval().map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut probe: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = control_events.recv() => match event {
                    Some(event) => self.handle_control_event(event).await,
                    None => break,
                },
                _ = tick(&mut health) => {
                    if probe.as_ref().is_some_and(|p| !p.is_finished()) {
                        debug!("previous health probe still running");
                        continue;
                    }
                    let this = Arc::clone(&self);
                    probe = Some(tokio::spawn(async move { this.check_data_health().await }));
                }
            }
        }
        if let Some(probe) = probe {
            probe.abort();
        }
        debug!("event loop stopped");
    }

    async fn handle_control_event(self: &Arc<Self>, event: ControlEvent) {
        match event {
            ControlEvent::Disconnected { peer_id } => {
                if self.control.is_open() {
                    debug!(peer = %peer_id, "ignoring drop of a replaced channel");
                    return;
                }
                warn!(peer = %peer_id, "control link dropped");
                let mut core = self.core.lock().await;
                let data_up = core.data.is_some();
                self.apply(&mut core, StateEvent::ControlLost { data_up });
            }
            ControlEvent::ValueChanged {
                characteristic,
                value,
            } => {
                let notification = match decode_notification(characteristic, &value) {
                    Ok(notification) => notification,
                    Err(e) => {
                        warn!(?characteristic, error = %e, "dropping malformed notification");
                        return;
                    }
                };
                if notification == PeerNotification::Network(NetworkStatus::Connected) {
                    let this = Arc::clone(self);
                    let token = self.epoch();
                    tokio::spawn(async move {
                        if token.is_cancelled() {
                            return;
                        }
                        this.refresh_address().await;
                        this.promote_within(token).await;
                    });
                }
                self.emit(ConnectionEvent::Notification(notification));
            }
        }
    }

    async fn check_data_health(&self) {
        let link = {
            let core = self.core.lock().await;
            match (&core.state, &core.data) {
                (ConnectionState::DataAvailable, Some(link)) => Arc::clone(link),
                _ => return,
            }
        };
        if let Err(e) = link.probe().await {
            warn!(error = %e, "data link health probe failed");
            self.demote_data_link(&link).await;
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Applies a state machine event and reports the change.
    fn apply(&self, core: &mut Core, event: StateEvent) {
        let from = core.state;
        let to = from.next(event);
        if from == to {
            return;
        }
        core.state = to;
        if to != ConnectionState::DataAvailable {
            core.data = None;
        }
        if to != ConnectionState::Pairing {
            core.session = None;
        }
        info!(%from, %to, ?event, "connection state changed");
        self.emit(ConnectionEvent::StateChanged { from, to });
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            warn!("failed to emit connection event: {e}");
        }
    }

    /// Applies `ControlLost` when a control link failure means the channel
    /// is gone.
    async fn control_failed(&self, err: ConnectionError) -> ConnectionError {
        if matches!(err, ConnectionError::LinkUnavailable) && !self.control.is_open() {
            let mut core = self.core.lock().await;
            if matches!(
                core.state,
                ConnectionState::Pairing | ConnectionState::ControlOnly | ConnectionState::DataAvailable
            ) {
                let data_up = core.data.is_some();
                self.apply(&mut core, StateEvent::ControlLost { data_up });
            }
        }
        err
    }

    async fn data_failed(&self, link: &Arc<dyn DataLink>, err: DataLinkError) -> ConnectionError {
        if let DataLinkError::TransportUnavailable(reason) = &err {
            warn!(%reason, "data link lost");
            self.demote_data_link(link).await;
        }
        err.into()
    }

    async fn demote_data_link(&self, link: &Arc<dyn DataLink>) {
        let mut core = self.core.lock().await;
        let current = core.data.as_ref().is_some_and(|cur| Arc::ptr_eq(cur, link));
        if current {
            let control_up = self.control.is_open();
            self.apply(&mut core, StateEvent::DataLost { control_up });
        }
    }

    fn epoch(&self) -> CancellationToken {
        match self.epoch.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn cancel_epoch(&self) {
        let mut token = self.epoch.lock().unwrap_or_else(|e| e.into_inner());
        token.cancel();
        *token = self.shutdown.child_token();
    }
}

async fn run_data(api: &DeviceApi, op: &Operation) -> Result<OperationOutput, DataLinkError> {
    Ok(match op {
        Operation::ReadSetting(setting) => {
            OperationOutput::Setting(setting_from(api.settings().await?, *setting))
        }
        Operation::WriteSetting(value) => OperationOutput::Ack(api.update_setting(value).await?),
        Operation::CapturePhoto => OperationOutput::Capture(api.capture_photo().await?),
        Operation::RecordVideo { seconds } => {
            OperationOutput::Capture(api.record_video(*seconds).await?)
        }
        Operation::System(command) => OperationOutput::Ack(api.system(*command).await?),
        Operation::RecentNotes => {
            let mut notes = api.notes().await?;
            keep_recent(&mut notes);
            OperationOutput::Notes(notes)
        }
        Operation::RecentTodos => {
            let mut todos = api.todos().await?;
            keep_recent(&mut todos);
            OperationOutput::Todos(todos)
        }
        Operation::AddNote { text } => OperationOutput::Ack(api.add_note(text).await?),
        Operation::AddTodo { task, priority } => {
            OperationOutput::Ack(api.add_todo(task, *priority).await?)
        }
        Operation::GetStatus => OperationOutput::Status(api.status().await?),
        Operation::GetSettings => OperationOutput::Settings(api.settings().await?),
        Operation::Snapshot => OperationOutput::Bytes(api.snapshot().await?),
        Operation::ListPhotos => OperationOutput::Media(api.list_media(MediaKind::Photo).await?),
        Operation::ListVideos => OperationOutput::Media(api.list_media(MediaKind::Video).await?),
        Operation::DownloadPhoto { id } => {
            OperationOutput::Bytes(api.download_media(MediaKind::Photo, id).await?)
        }
        Operation::DownloadVideo { id } => {
            OperationOutput::Bytes(api.download_media(MediaKind::Video, id).await?)
        }
        Operation::DeletePhoto { id } => {
            OperationOutput::Ack(api.delete_media(MediaKind::Photo, id).await?)
        }
        Operation::DeleteVideo { id } => {
            OperationOutput::Ack(api.delete_media(MediaKind::Video, id).await?)
        }
        Operation::GetConversation => OperationOutput::Conversation(api.conversation().await?),
        Operation::ClearConversation => OperationOutput::Ack(api.clear_conversation().await?),
    })
}

fn setting_from(settings: Settings, setting: Setting) -> SettingValue {
    match setting {
        Setting::Personality => SettingValue::Personality(settings.personality),
        Setting::AssistantName => SettingValue::AssistantName(settings.name),
        Setting::WakeWord => SettingValue::WakeWord(settings.wake_word),
        Setting::Voice => SettingValue::Voice(settings.voice),
    }
}

fn next_id(ids: impl Iterator<Item = u32>) -> Result<u32, DecodeError> {
    match ids.max() {
        None => Ok(1),
        Some(last) => last
            .checked_add(1)
            .ok_or_else(|| DecodeError::invalid("id", format!("no id left after {last}"))),
    }
}

/// Keeps the newest items mirrored on the control link.
fn keep_recent<T>(items: &mut Vec<T>) {
    if items.len() > SYNC_RECENT_ITEMS {
        items.drain(..items.len() - SYNC_RECENT_ITEMS);
    }
}

fn decode_notification(
    characteristic: Characteristic,
    value: &[u8],
) -> Result<PeerNotification, DecodeError> {
    let text = || String::from_utf8(value.to_vec()).map(|s| s.trim().to_string());
    Ok(match characteristic {
        Characteristic::PairingCode => PeerNotification::PairingCode(text()?),
        Characteristic::PairingStatus => {
            PeerNotification::PairingStatus(PairingStatus::from_bytes(value)?)
        }
        Characteristic::StatusMode => PeerNotification::Mode(text()?.parse()?),
        Characteristic::StatusMessage => PeerNotification::StatusMessage(text()?),
        Characteristic::ActionResponse => PeerNotification::Action(decode_json(value)?),
        Characteristic::WifiStatus => PeerNotification::Network(NetworkStatus::from_bytes(value)?),
        Characteristic::BatteryLevel => match value {
            [level] if *level <= 100 => PeerNotification::Battery(*level),
            other => {
                return Err(DecodeError::invalid("battery level", format!("{other:?}")));
            }
        },
        other => PeerNotification::Raw {
            characteristic: other,
            value: value.to_vec(),
        },
    })
}

/// Runs `fut` unless `token` is cancelled first.
async fn cancellable<F: Future>(
    token: &CancellationToken,
    fut: F,
) -> Result<F::Output, ConnectionError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ConnectionError::Cancelled),
        out = fut => Ok(out),
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests;
