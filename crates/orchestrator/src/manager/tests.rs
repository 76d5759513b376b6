use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::Timelike;

use glasslink_control_link::fake::{FakeBackend, FakePeripheral};
use glasslink_data_link::{DataFuture, HttpConnector};
use glasslink_protocol::{ActionResponse, NetworkInfo, SystemCommand, TodoPriority};

use super::*;
use crate::store::{Entries, MemoryCredentialStore, StoreError};

const CODE: &str = "482913";
const KEY: &str = "abc123";
const HOME_IP: &str = "192.168.1.77";

const STATUS_JSON: &str = r#"{"mode":"active","personality":"friendly","name":"Jarvis","battery":85,"connected":true,"timestamp":"2025-01-15T10:30:00"}"#;
const PHOTOS_JSON: &str =
    r#"[{"id":"p1","filename":"photo_0001.jpg","size":2048,"timestamp":"2025-01-15T10:30:00"}]"#;
const CAPTURE_JSON: &str =
    r#"{"success":true,"path":"photos/photo_0001.jpg","filename":"photo_0001.jpg"}"#;

// ---------------------------------------------------------------------------
// Mock network
// ---------------------------------------------------------------------------

#[derive(Default)]
struct NetState {
    unreachable: AtomicBool,
    /// Probes never answer.
    hung: AtomicBool,
    probes: AtomicUsize,
    requests: StdMutex<Vec<(String, String)>>,
    endpoints: StdMutex<Vec<DataEndpoint>>,
}

/// Connector whose links answer from canned bodies.
#[derive(Clone, Default)]
struct MockNetwork(Arc<NetState>);

impl MockNetwork {
    fn set_unreachable(&self, unreachable: bool) {
        self.0.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn hang_probes(&self) {
        self.0.hung.store(true, Ordering::SeqCst);
    }

    fn requests(&self) -> Vec<(String, String)> {
        self.0.requests.lock().unwrap().clone()
    }

    fn probes(&self) -> usize {
        self.0.probes.load(Ordering::SeqCst)
    }
}

impl DataLinkConnector for MockNetwork {
    fn connect(&self, endpoint: DataEndpoint) -> Result<Arc<dyn DataLink>, DataLinkError> {
        self.0.endpoints.lock().unwrap().push(endpoint.clone());
        Ok(Arc::new(MockLink {
            endpoint,
            net: Arc::clone(&self.0),
        }))
    }
}

struct MockLink {
    endpoint: DataEndpoint,
    net: Arc<NetState>,
}

impl MockLink {
    fn respond(&self, method: &str, path: &str) -> DataFuture<'_, Vec<u8>> {
        let result = if self.net.unreachable.load(Ordering::SeqCst) {
            Err(DataLinkError::TransportUnavailable("connection refused".into()))
        } else {
            self.net
                .requests
                .lock()
                .unwrap()
                .push((method.to_string(), path.to_string()));
            let body = match path {
                "/status" => STATUS_JSON,
                "/photos" => PHOTOS_JSON,
                "/camera/capture" => CAPTURE_JSON,
                _ => r#"{"success":true}"#,
            };
            Ok(body.as_bytes().to_vec())
        };
        Box::pin(async move { result })
    }
}

impl DataLink for MockLink {
    fn endpoint(&self) -> &DataEndpoint {
        &self.endpoint
    }

    fn get<'a>(&'a self, path: &'a str) -> DataFuture<'a, Vec<u8>> {
        self.respond("GET", path)
    }

    fn post<'a>(&'a self, path: &'a str, _body: Option<serde_json::Value>) -> DataFuture<'a, Vec<u8>> {
        self.respond("POST", path)
    }

    fn put<'a>(&'a self, path: &'a str, _body: serde_json::Value) -> DataFuture<'a, Vec<u8>> {
        self.respond("PUT", path)
    }

    fn delete<'a>(&'a self, path: &'a str) -> DataFuture<'a, Vec<u8>> {
        self.respond("DELETE", path)
    }

    fn probe(&self) -> DataFuture<'_, ()> {
        if self.net.hung.load(Ordering::SeqCst) {
            return Box::pin(std::future::pending());
        }
        let result = if self.net.unreachable.load(Ordering::SeqCst) {
            Err(DataLinkError::TransportUnavailable("connection refused".into()))
        } else {
            self.net.probes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        Box::pin(async move { result })
    }
}

struct FailingStore;

impl CredentialStore for FailingStore {
    fn read_all(&self) -> Result<Entries, StoreError> {
        Ok(Entries::new())
    }

    fn write_all(&self, _entries: &Entries) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }

    fn clear(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn glasses() -> PeerDescriptor {
    PeerDescriptor {
        id: "dev-1".into(),
        name: Some("Glasses".into()),
        rssi: Some(-60),
    }
}

fn home_network() -> NetworkInfo {
    NetworkInfo {
        ip: HOME_IP.into(),
        subnet: "255.255.255.0".into(),
        gateway: "192.168.1.1".into(),
    }
}

struct Harness {
    orch: Arc<Orchestrator>,
    control: Arc<ControlLink>,
    device: FakePeripheral,
    net: MockNetwork,
    store: Arc<MemoryCredentialStore>,
}

impl Harness {
    fn new() -> Self {
        Self::build(FakePeripheral::new(CODE, KEY), MemoryCredentialStore::new())
    }

    fn build(device: FakePeripheral, store: MemoryCredentialStore) -> Self {
        Self::build_with(device, store, OrchestratorConfig::default())
    }

    fn build_with(
        device: FakePeripheral,
        store: MemoryCredentialStore,
        config: OrchestratorConfig,
    ) -> Self {
        let backend = FakeBackend::new().with_peer(glasses(), device.clone());
        let control =
            Arc::new(ControlLink::new(Arc::new(backend)).with_op_timeout(Duration::from_millis(200)));
        let net = MockNetwork::default();
        let store = Arc::new(store);
        let orch = Arc::new(Orchestrator::new(
            Arc::clone(&control),
            Arc::new(net.clone()),
            store.clone(),
            config,
        ));
        Self {
            orch,
            control,
            device,
            net,
            store,
        }
    }

    /// Opens the control link and completes pairing.
    async fn paired(self) -> Self {
        self.orch.open(&glasses()).await.unwrap();
        self.orch.pair(CODE).await.unwrap();
        self
    }

    /// Paired with the data link promoted.
    async fn promoted(self) -> Self {
        self.device.set_network_info(&home_network());
        let h = self.paired().await;
        assert_eq!(h.orch.state().await, ConnectionState::DataAvailable);
        h
    }

    /// Paired with an address known but the network unreachable.
    async fn promoted_unreachable(self) -> Self {
        self.device.set_network_info(&home_network());
        let h = self.paired().await;
        assert_eq!(h.orch.state().await, ConnectionState::ControlOnly);
        h
    }
}

fn drain(rx: &mut mpsc::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn wait_for_state(orch: &Orchestrator, want: ConnectionState) {
    for _ in 0..200 {
        if orch.state().await == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("state never became {want}, still {}", orch.state().await);
}

// ---------------------------------------------------------------------------
// Pairing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn valid_code_pairs_once() {
    let h = Harness::new();
    let mut events = h.orch.take_events().await.unwrap();
    h.net.set_unreachable(true);
    h.device.set_network_info(&home_network());

    h.orch.open(&glasses()).await.unwrap();
    let device = h.orch.pair(CODE).await.unwrap();

    assert_eq!(device.device_id, "dev-1");
    assert_eq!(device.display_name.as_deref(), Some("Glasses"));
    assert_eq!(h.orch.state().await, ConnectionState::ControlOnly);
    assert!(h.orch.pairing_session().await.is_none());

    let cred = h.orch.credential().await.unwrap();
    assert_eq!(cred.api_key, KEY);
    assert_eq!(cred.ip_address.as_deref(), Some(HOME_IP));
    assert_eq!(h.store.read_all().unwrap()["api_key"], KEY);

    let events = drain(&mut events);
    let paired = events
        .iter()
        .filter(|e| matches!(e, ConnectionEvent::Paired { .. }))
        .count();
    assert_eq!(paired, 1);
    let into_control_only = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                ConnectionEvent::StateChanged {
                    to: ConnectionState::ControlOnly,
                    ..
                }
            )
        })
        .count();
    assert_eq!(into_control_only, 1);
}

#[tokio::test]
async fn pairing_promotes_reachable_data_link() {
    let h = Harness::new().promoted().await;

    assert_eq!(h.net.probes(), 1);
    let endpoints = h.net.0.endpoints.lock().unwrap().clone();
    assert_eq!(endpoints[0].address, HOME_IP);
    assert_eq!(endpoints[0].api_key, KEY);
    assert_eq!(endpoints[0].port, 5000);
    assert_eq!(
        h.orch.credential().await.unwrap().preferred_transport,
        PreferredTransport::Data
    );
    assert_eq!(h.store.read_all().unwrap()["preferred_transport"], "data");
}

#[tokio::test]
async fn invalid_codes_exhaust_session() {
    let h = Harness::new();
    h.orch.open(&glasses()).await.unwrap();

    let err = h.orch.pair("111111").await.unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::PairingFailed(PairingFailure::InvalidCode {
            attempts_remaining: 2
        })
    ));
    assert_eq!(h.orch.state().await, ConnectionState::Pairing);

    let err = h.orch.pair("222222").await.unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::PairingFailed(PairingFailure::InvalidCode {
            attempts_remaining: 1
        })
    ));

    let err = h.orch.pair("333333").await.unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::PairingFailed(PairingFailure::AttemptsExhausted)
    ));
    assert_eq!(h.orch.state().await, ConnectionState::Unpaired);
    assert!(h.orch.pairing_session().await.is_none());
    assert!(!h.control.is_open());
    assert!(h.orch.credential().await.is_none());

    // A new session needs a fresh channel.
    let err = h.orch.pair(CODE).await.unwrap_err();
    assert!(matches!(err, ConnectionError::LinkUnavailable));
    h.orch.open(&glasses()).await.unwrap();
    h.orch.pair(CODE).await.unwrap();
    assert_eq!(h.orch.state().await, ConnectionState::ControlOnly);
}

#[tokio::test]
async fn malformed_code_never_reaches_peer() {
    let h = Harness::new();
    h.orch.open(&glasses()).await.unwrap();

    let err = h.orch.pair("12ab").await.unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::PairingFailed(PairingFailure::InvalidCode {
            attempts_remaining: 2
        })
    ));
    assert!(h.device.writes_to(Characteristic::PairingStatus).is_empty());
}

#[tokio::test(start_paused = true)]
async fn pairing_timeout_keeps_attempts() {
    let h = Harness::new();
    h.orch.open(&glasses()).await.unwrap();
    h.device.set_stalled(true);

    let err = h.orch.pair(CODE).await.unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::PairingFailed(PairingFailure::Timeout)
    ));
    assert_eq!(h.orch.state().await, ConnectionState::Pairing);
    assert_eq!(
        h.orch.pairing_session().await.unwrap().attempts_remaining(),
        3
    );
}

#[tokio::test]
async fn pairing_twice_is_rejected() {
    let h = Harness::new().paired().await;
    let err = h.orch.pair(CODE).await.unwrap_err();
    assert!(matches!(err, ConnectionError::AlreadyPaired));
    let err = h.orch.begin_pairing().await.unwrap_err();
    assert!(matches!(err, ConnectionError::AlreadyPaired));
}

#[tokio::test]
async fn pairing_requires_open_control_link() {
    let h = Harness::new();
    let err = h.orch.pair(CODE).await.unwrap_err();
    assert!(matches!(err, ConnectionError::LinkUnavailable));
    assert_eq!(h.orch.state().await, ConnectionState::Unpaired);
}

#[tokio::test]
async fn begin_pairing_reports_code() {
    let h = Harness::new();
    let mut events = h.orch.take_events().await.unwrap();
    h.orch.open(&glasses()).await.unwrap();

    let code = h.orch.begin_pairing().await.unwrap();
    assert_eq!(code, CODE);
    assert_eq!(h.orch.state().await, ConnectionState::Pairing);
    assert_eq!(
        h.orch.pairing_session().await.unwrap().expected_code.as_deref(),
        Some(CODE)
    );
    assert!(drain(&mut events).contains(&ConnectionEvent::PairingCode {
        code: CODE.into()
    }));
}

#[tokio::test]
async fn unwritable_store_fails_pairing() {
    let backend = FakeBackend::new().with_peer(glasses(), FakePeripheral::new(CODE, KEY));
    let control = Arc::new(ControlLink::new(Arc::new(backend)));
    let orch = Orchestrator::new(
        Arc::clone(&control),
        Arc::new(MockNetwork::default()),
        Arc::new(FailingStore),
        OrchestratorConfig::default(),
    );

    orch.open(&glasses()).await.unwrap();
    let err = orch.pair(CODE).await.unwrap_err();
    assert!(matches!(err, ConnectionError::CredentialPersistenceFailed(_)));
    assert_eq!(orch.state().await, ConnectionState::Pairing);
    assert!(orch.credential().await.is_none());
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn data_operations_need_data_link() {
    let h = Harness::new().paired().await;
    assert_eq!(h.orch.state().await, ConnectionState::ControlOnly);

    for op in [
        Operation::ListPhotos,
        Operation::GetStatus,
        Operation::DownloadPhoto { id: "p1".into() },
    ] {
        let err = h.orch.execute(op).await.unwrap_err();
        assert!(matches!(err, ConnectionError::TransportUnavailable));
    }
}

#[tokio::test]
async fn control_operations_need_pairing() {
    let h = Harness::new();
    h.orch.open(&glasses()).await.unwrap();
    let err = h.orch.execute(Operation::CapturePhoto).await.unwrap_err();
    assert!(matches!(err, ConnectionError::NotPaired));
}

#[tokio::test]
async fn control_link_wins_when_both_are_up() {
    let h = Harness::new().promoted().await;

    let out = h.orch.execute(Operation::CapturePhoto).await.unwrap();
    assert_eq!(
        out,
        OperationOutput::Action(ActionResponse {
            success: true,
            path: Some("photos/photo_0001.jpg".into()),
            message: None,
            error: None,
        })
    );
    assert_eq!(
        h.device.writes_to(Characteristic::CameraControl),
        vec![b"photo".to_vec()]
    );
    assert!(h.net.requests().iter().all(|(_, path)| path != "/camera/capture"));
}

#[tokio::test]
async fn control_operations_fall_back_to_data_link() {
    let h = Harness::new().promoted().await;
    h.control.close().await;

    let out = h.orch.execute(Operation::CapturePhoto).await.unwrap();
    match out {
        OperationOutput::Capture(result) => {
            assert_eq!(result.filename.as_deref(), Some("photo_0001.jpg"))
        }
        other => panic!("unexpected output {other:?}"),
    }
    assert!(
        h.net
            .requests()
            .contains(&("POST".into(), "/camera/capture".into()))
    );

    let err = h
        .orch
        .execute(Operation::System(SystemCommand::Restart))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::Unsupported("restart")));
    assert_eq!(h.orch.state().await, ConnectionState::DataAvailable);
}

#[tokio::test]
async fn data_operations_use_data_link() {
    let h = Harness::new().promoted().await;

    match h.orch.execute(Operation::ListPhotos).await.unwrap() {
        OperationOutput::Media(items) => {
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].id, "p1");
        }
        other => panic!("unexpected output {other:?}"),
    }
    match h.orch.execute(Operation::GetStatus).await.unwrap() {
        OperationOutput::Status(status) => assert_eq!(status.battery, 85),
        other => panic!("unexpected output {other:?}"),
    }
}

#[tokio::test]
async fn zero_length_recording_is_rejected() {
    let h = Harness::new().paired().await;
    let err = h
        .orch
        .execute(Operation::RecordVideo { seconds: 0 })
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::Protocol(_)));
    assert!(h.device.writes_to(Characteristic::CameraControl).is_empty());
}

#[tokio::test]
async fn transport_failure_demotes_to_control_only() {
    let h = Harness::new().promoted().await;
    h.net.set_unreachable(true);

    let err = h.orch.execute(Operation::GetStatus).await.unwrap_err();
    assert!(matches!(err, ConnectionError::TransportUnavailable));
    assert_eq!(h.orch.state().await, ConnectionState::ControlOnly);

    // Control operations keep working.
    h.orch
        .execute(Operation::ReadSetting(Setting::AssistantName))
        .await
        .unwrap();
}

#[tokio::test]
async fn add_note_keeps_recent_items() {
    let h = Harness::new();
    let notes: Vec<String> = (1..=5)
        .map(|i| {
            format!(r#"{{"id":{i},"text":"n{i}","timestamp":"2025-01-15T10:30:00","date":"2025-01-15 10:30 AM"}}"#)
        })
        .collect();
    h.device
        .set_value(Characteristic::Notes, format!("[{}]", notes.join(",")).into_bytes());
    let h = h.paired().await;

    h.orch
        .execute(Operation::AddNote {
            text: "Buy milk".into(),
        })
        .await
        .unwrap();

    let written = h.device.writes_to(Characteristic::Notes);
    let stored: Vec<Note> = serde_json::from_slice(written.last().unwrap()).unwrap();
    assert_eq!(stored.len(), 5);
    assert_eq!(stored[0].id, 2);
    assert_eq!(stored[4].id, 6);
    assert_eq!(stored[4].text, "Buy milk");
    let date = chrono::NaiveDateTime::parse_from_str(&stored[4].date, NOTE_DATE_FORMAT).unwrap();
    assert_eq!(date, stored[4].timestamp.with_second(0).unwrap());
}

#[tokio::test]
async fn add_note_rejects_exhausted_ids() {
    let h = Harness::new();
    let last = format!(
        r#"[{{"id":{},"text":"last","timestamp":"2025-01-15T10:30:00","date":"2025-01-15 10:30 AM"}}]"#,
        u32::MAX
    );
    h.device.set_value(Characteristic::Notes, last.into_bytes());
    let h = h.paired().await;

    let err = h
        .orch
        .execute(Operation::AddNote {
            text: "one more".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::Protocol(_)));
    assert!(h.device.writes_to(Characteristic::Notes).is_empty());
    assert_eq!(h.orch.state().await, ConnectionState::ControlOnly);
}

#[tokio::test]
async fn snapshot_uses_data_link() {
    let h = Harness::new().promoted().await;
    match h.orch.execute(Operation::Snapshot).await.unwrap() {
        OperationOutput::Bytes(bytes) => assert!(!bytes.is_empty()),
        other => panic!("unexpected output {other:?}"),
    }
    assert!(
        h.net
            .requests()
            .contains(&("GET".into(), "/camera/snapshot".into()))
    );
}

#[tokio::test]
async fn add_todo_over_control_link() {
    let h = Harness::new().paired().await;
    h.orch
        .execute(Operation::AddTodo {
            task: "Call mom".into(),
            priority: TodoPriority::High,
        })
        .await
        .unwrap();

    match h.orch.execute(Operation::RecentTodos).await.unwrap() {
        OperationOutput::Todos(todos) => {
            assert_eq!(todos.len(), 1);
            assert_eq!(todos[0].id, 1);
            assert_eq!(todos[0].priority, TodoPriority::High);
        }
        other => panic!("unexpected output {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Teardown and reconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unpair_is_idempotent() {
    let h = Harness::new().promoted().await;

    h.orch.unpair().await.unwrap();
    assert_eq!(h.orch.state().await, ConnectionState::Unpaired);
    assert!(h.orch.credential().await.is_none());
    assert!(h.store.read_all().unwrap().is_empty());
    assert!(!h.control.is_open());

    h.orch.unpair().await.unwrap();
    assert_eq!(h.orch.state().await, ConnectionState::Unpaired);
}

async fn assert_unpaired(h: &Harness) {
    h.orch.unpair().await.unwrap();
    assert_eq!(h.orch.state().await, ConnectionState::Unpaired);
    assert!(h.orch.credential().await.is_none());
    assert!(h.orch.pairing_session().await.is_none());
    assert!(h.store.read_all().unwrap().is_empty());
    assert!(!h.control.is_open());
}

#[tokio::test]
async fn unpair_from_every_state() {
    let fresh = Harness::new();
    assert_unpaired(&fresh).await;

    let pairing = Harness::new();
    pairing.orch.open(&glasses()).await.unwrap();
    pairing.orch.begin_pairing().await.unwrap();
    assert_eq!(pairing.orch.state().await, ConnectionState::Pairing);
    assert_unpaired(&pairing).await;

    let control_only = Harness::new().paired().await;
    assert_eq!(control_only.orch.state().await, ConnectionState::ControlOnly);
    assert_unpaired(&control_only).await;

    let dropped = Harness::new().paired().await;
    dropped.orch.disconnect().await;
    assert_eq!(dropped.orch.state().await, ConnectionState::Disconnected);
    assert_unpaired(&dropped).await;
}

/// Starts `pair()` against a peer that never answers the verification.
async fn stalled_pairing(h: &Harness) -> tokio::task::JoinHandle<Result<Device, ConnectionError>> {
    h.orch.open(&glasses()).await.unwrap();
    h.device.set_stalled(true);
    let orch = Arc::clone(&h.orch);
    let task = tokio::spawn(async move { orch.pair(CODE).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    task
}

#[tokio::test]
async fn disconnect_cancels_pairing() {
    let h = Harness::new();
    let task = stalled_pairing(&h).await;

    h.orch.disconnect().await;

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, ConnectionError::Cancelled));
    assert!(h.orch.credential().await.is_none());
    assert!(h.store.read_all().unwrap().is_empty());
    assert_eq!(h.orch.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn unpair_cancels_pairing() {
    let h = Harness::new();
    let task = stalled_pairing(&h).await;

    h.orch.unpair().await.unwrap();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, ConnectionError::Cancelled));
    assert!(h.store.read_all().unwrap().is_empty());
    assert_eq!(h.orch.state().await, ConnectionState::Unpaired);
}

#[tokio::test(start_paused = true)]
async fn reconnect_keeps_channel_opened_during_scan() {
    let h = Harness::new();
    let task = {
        let orch = Arc::clone(&h.orch);
        tokio::spawn(async move { orch.reconnect().await })
    };
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    h.orch.open(&glasses()).await.unwrap();
    h.orch.begin_pairing().await.unwrap();

    assert_eq!(task.await.unwrap(), ReconnectOutcome::ControlLink);
    assert_eq!(h.device.connect_count(), 1);
    assert_eq!(h.orch.state().await, ConnectionState::Pairing);

    // The handshake survives on the caller's channel.
    h.orch.pair(CODE).await.unwrap();
    assert_eq!(h.orch.state().await, ConnectionState::ControlOnly);
}

#[tokio::test]
async fn disconnect_cancels_pending_promotion() {
    let h = Harness::new();
    h.net.set_unreachable(true);
    let h = h.promoted_unreachable().await;
    h.net.set_unreachable(false);

    // Queues a promotion task, then tears down before it runs.
    h.orch
        .handle_control_event(ControlEvent::ValueChanged {
            characteristic: Characteristic::WifiStatus,
            value: b"connected".to_vec(),
        })
        .await;
    h.orch.disconnect().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.orch.state().await, ConnectionState::Disconnected);
    assert_eq!(h.net.probes(), 0);
}

#[tokio::test]
async fn reconnect_prefers_data_link() {
    let h = Harness::new().promoted().await;
    h.orch.disconnect().await;
    assert_eq!(h.orch.state().await, ConnectionState::Disconnected);
    assert!(h.orch.credential().await.is_some());

    let outcome = h.orch.reconnect().await;
    assert_eq!(outcome, ReconnectOutcome::DataLink);
    assert_eq!(h.orch.state().await, ConnectionState::DataAvailable);
    assert_eq!(h.device.connect_count(), 1);
}

#[tokio::test]
async fn reconnect_falls_back_to_control_link() {
    let h = Harness::new();
    h.net.set_unreachable(true);
    let h = h.promoted_unreachable().await;
    h.orch.disconnect().await;

    let outcome = h.orch.reconnect().await;
    assert_eq!(outcome, ReconnectOutcome::ControlLink);
    assert_eq!(h.orch.state().await, ConnectionState::ControlOnly);
    assert_eq!(h.device.connect_count(), 2);
}

#[tokio::test]
async fn reconnect_reports_unreachable_peer() {
    let h = Harness::new().paired().await;
    h.orch.disconnect().await;
    h.device.set_reachable(false);

    assert_eq!(h.orch.reconnect().await, ReconnectOutcome::Unreachable);
    assert_eq!(h.orch.state().await, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn unpair_cancels_reconnect() {
    let control = Arc::new(ControlLink::new(Arc::new(FakeBackend::new())));
    let orch = Arc::new(Orchestrator::new(
        control,
        Arc::new(MockNetwork::default()),
        Arc::new(MemoryCredentialStore::new()),
        OrchestratorConfig::default(),
    ));

    let task = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.reconnect().await })
    };
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    orch.unpair().await.unwrap();

    assert_eq!(task.await.unwrap(), ReconnectOutcome::Cancelled);
    assert_eq!(orch.state().await, ConnectionState::Unpaired);
}

#[tokio::test]
async fn stored_credential_starts_disconnected() {
    let entries = Entries::from([
        ("device_id".to_string(), "dev-1".to_string()),
        ("api_key".to_string(), KEY.to_string()),
        ("ip_address".to_string(), HOME_IP.to_string()),
    ]);
    let h = Harness::build(
        FakePeripheral::new(CODE, KEY),
        MemoryCredentialStore::with_entries(entries),
    );
    assert_eq!(h.orch.state().await, ConnectionState::Disconnected);

    assert_eq!(h.orch.reconnect().await, ReconnectOutcome::DataLink);
    assert_eq!(h.device.connect_count(), 0);
}

#[tokio::test]
async fn events_can_be_taken_once() {
    let h = Harness::new();
    assert!(h.orch.take_events().await.is_some());
    assert!(h.orch.take_events().await.is_none());
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn control_drop_disconnects() {
    let h = Harness::new().paired().await;
    h.orch.start().await;

    h.device.drop_link();
    wait_for_state(&h.orch, ConnectionState::Disconnected).await;
    assert!(h.orch.credential().await.is_some());
    h.orch.shutdown().await;
}

#[tokio::test]
async fn network_join_promotes_data_link() {
    let h = Harness::new().paired().await;
    let mut events = h.orch.take_events().await.unwrap();
    h.orch.start().await;
    h.device.join_network_as(home_network());

    h.orch.provision_network("HomeNet", "hunter22").await.unwrap();
    wait_for_state(&h.orch, ConnectionState::DataAvailable).await;

    assert_eq!(
        h.orch.credential().await.unwrap().ip_address.as_deref(),
        Some(HOME_IP)
    );
    assert!(drain(&mut events).contains(&ConnectionEvent::Notification(
        PeerNotification::Network(NetworkStatus::Connected)
    )));
    h.orch.shutdown().await;
}

#[tokio::test]
async fn notifications_are_decoded() {
    let h = Harness::new().paired().await;
    let mut events = h.orch.take_events().await.unwrap();
    h.orch.start().await;

    h.device.notify(Characteristic::BatteryLevel, vec![42]);
    h.device.notify(Characteristic::StatusMode, b"sleep".to_vec());

    let mut seen = Vec::new();
    for _ in 0..200 {
        seen.extend(drain(&mut events));
        if seen.contains(&ConnectionEvent::Notification(PeerNotification::Mode(
            glasslink_protocol::StatusMode::Sleep,
        ))) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(seen.contains(&ConnectionEvent::Notification(PeerNotification::Battery(42))));
    assert!(seen.contains(&ConnectionEvent::Notification(PeerNotification::Mode(
        glasslink_protocol::StatusMode::Sleep
    ))));
    h.orch.shutdown().await;
}

#[tokio::test]
async fn hung_health_probe_does_not_block_events() {
    let config = OrchestratorConfig {
        health_interval_ms: 10,
        ..OrchestratorConfig::default()
    };
    let h = Harness::build_with(
        FakePeripheral::new(CODE, KEY),
        MemoryCredentialStore::new(),
        config,
    )
    .promoted()
    .await;
    let mut events = h.orch.take_events().await.unwrap();
    h.net.hang_probes();
    h.orch.start().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.device.notify(Characteristic::BatteryLevel, vec![17]);
    let mut seen = Vec::new();
    for _ in 0..100 {
        seen.extend(drain(&mut events));
        if seen.contains(&ConnectionEvent::Notification(PeerNotification::Battery(17))) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(seen.contains(&ConnectionEvent::Notification(PeerNotification::Battery(17))));
    assert_eq!(h.orch.state().await, ConnectionState::DataAvailable);
    h.orch.shutdown().await;
}

#[test]
fn next_id_follows_highest() {
    assert_eq!(next_id(std::iter::empty()).unwrap(), 1);
    assert_eq!(next_id([3, 9, 4].into_iter()).unwrap(), 10);
    assert!(next_id([7, u32::MAX].into_iter()).is_err());
}

#[test]
fn decode_notification_rejects_bad_battery() {
    assert!(decode_notification(Characteristic::BatteryLevel, &[120]).is_err());
    assert_eq!(
        decode_notification(Characteristic::WifiStatus, b"connecting").unwrap(),
        PeerNotification::Network(NetworkStatus::Connecting)
    );
    assert!(matches!(
        decode_notification(Characteristic::Notes, b"[]").unwrap(),
        PeerNotification::Raw { .. }
    ));
}

#[test]
fn keep_recent_trims_oldest() {
    let mut items: Vec<u32> = (1..=8).collect();
    keep_recent(&mut items);
    assert_eq!(items, vec![4, 5, 6, 7, 8]);
}

// ---------------------------------------------------------------------------
// End to end over HTTP
// ---------------------------------------------------------------------------

/// Serves canned JSON per path until the test ends.
async fn glasses_server() -> u16 {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let (status, body) = if !request.to_ascii_lowercase().contains("x-api-key: abc123") {
                    (401, r#"{"error":"Unauthorized"}"#)
                } else if request.starts_with("GET /api/connection/test ") {
                    (200, r#"{"status":"ok","message":"Connection successful"}"#)
                } else if request.starts_with("GET /api/status ") {
                    (200, STATUS_JSON)
                } else {
                    (404, r#"{"error":"Not found"}"#)
                };
                let resp = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    port
}

#[tokio::test]
async fn end_to_end_over_http() {
    let port = glasses_server().await;
    let device = FakePeripheral::new(CODE, KEY);
    device.set_network_info(&NetworkInfo {
        ip: "127.0.0.1".into(),
        subnet: String::new(),
        gateway: String::new(),
    });
    let backend = FakeBackend::new().with_peer(glasses(), device);
    let control = Arc::new(ControlLink::new(Arc::new(backend)));
    let config = OrchestratorConfig {
        data_port: port,
        request_timeout_ms: 2_000,
        ..OrchestratorConfig::default()
    };
    let orch = Orchestrator::new(
        control,
        Arc::new(HttpConnector),
        Arc::new(MemoryCredentialStore::new()),
        config,
    );

    orch.open(&glasses()).await.unwrap();
    orch.pair(CODE).await.unwrap();
    assert_eq!(orch.state().await, ConnectionState::DataAvailable);

    match orch.execute(Operation::GetStatus).await.unwrap() {
        OperationOutput::Status(status) => assert_eq!(status.name, "Jarvis"),
        other => panic!("unexpected output {other:?}"),
    }
    let err = orch.execute(Operation::ListVideos).await.unwrap_err();
    assert!(matches!(err, ConnectionError::Remote { status: 404 }));
    assert_eq!(orch.state().await, ConnectionState::DataAvailable);
}
