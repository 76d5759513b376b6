//! Wires the links, the credential store and the orchestrator together and
//! runs one CLI command.

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use glasslink_control_link::{BtleplugBackend, ControlLink, GattBackend, PeerDescriptor};
use glasslink_data_link::{DataLinkConnector, HttpConnector};
use glasslink_orchestrator::{
    ConnectionError, ConnectionEvent, ConnectionState, CredentialStore, FileCredentialStore,
    Operation, OperationOutput, Orchestrator, PairingFailure, ReconnectConfig, ReconnectOutcome,
};
use glasslink_protocol::{Setting, SettingValue};

use crate::cli::{Command, MediaArg};
use crate::config::Config;

/// Runs `command` against the host Bluetooth adapter and the local network.
pub async fn run(config: Config, command: Command) -> anyhow::Result<()> {
    let backend = BtleplugBackend::new()
        .await
        .context("bluetooth unavailable")?;
    let store = match &config.credential_path {
        Some(path) => FileCredentialStore::new(path.clone()),
        None => FileCredentialStore::at_default_path()
            .context("cannot determine the credential file location")?,
    };
    info!(path = %store.path().display(), "using credential store");

    let orch = assemble(
        Arc::new(backend),
        Arc::new(HttpConnector),
        Arc::new(store),
        &config,
    );
    let events = orch
        .take_events()
        .await
        .context("orchestrator events already taken")?;

    let result = match command {
        Command::Run => stay_connected(&orch, events, config.reconnect_attempts).await,
        command => {
            tokio::spawn(log_events(events));
            dispatch(&orch, command, config.reconnect_attempts).await
        }
    };

    orch.shutdown().await;
    result
}

fn assemble(
    backend: Arc<dyn GattBackend>,
    connector: Arc<dyn DataLinkConnector>,
    store: Arc<dyn CredentialStore>,
    config: &Config,
) -> Arc<Orchestrator> {
    let control = ControlLink::new(backend).with_op_timeout(config.orchestrator.control_timeout());
    Arc::new(Orchestrator::new(
        Arc::new(control),
        connector,
        store,
        config.orchestrator.clone(),
    ))
}

async fn dispatch(orch: &Arc<Orchestrator>, command: Command, attempts: u32) -> anyhow::Result<()> {
    match command {
        Command::Scan { seconds } => {
            let mut peers = orch.discover(Duration::from_secs(seconds)).await?;
            let mut found = 0;
            while let Some(peer) = peers.next().await {
                found += 1;
                println!(
                    "{}\t{}\t{}",
                    peer.id,
                    peer.name.as_deref().unwrap_or("-"),
                    peer.rssi.map_or("-".to_string(), |r| format!("{r} dBm"))
                );
            }
            if found == 0 {
                println!("no glasses found");
            }
            Ok(())
        }
        Command::Pair { code, peer } => pair(orch, code, peer).await,
        Command::Unpair => {
            orch.unpair().await?;
            println!("unpaired");
            Ok(())
        }
        Command::Provision { ssid, secret } => {
            connect(orch, attempts).await?;
            orch.provision_network(&ssid, &secret).await?;
            println!("network credentials sent to the glasses");
            Ok(())
        }
        Command::Run => bail!("run is handled by the event loop"),
        Command::Download { kind, id, out } => {
            connect(orch, attempts).await?;
            let op = match kind {
                MediaArg::Photos => Operation::DownloadPhoto { id: id.clone() },
                MediaArg::Videos => Operation::DownloadVideo { id: id.clone() },
            };
            save(orch.execute(op).await?, &out.unwrap_or_else(|| id.into())).await
        }
        Command::Snapshot { out } => {
            connect(orch, attempts).await?;
            save(orch.execute(Operation::Snapshot).await?, &out).await
        }
        command => {
            let op = operation(command)?;
            connect(orch, attempts).await?;
            let output = orch.execute(op).await?;
            println!("{}", render(&output)?);
            Ok(())
        }
    }
}

async fn save(output: OperationOutput, out: &Path) -> anyhow::Result<()> {
    let OperationOutput::Bytes(bytes) = output else {
        bail!("expected file contents, got {output:?}");
    };
    tokio::fs::write(out, &bytes)
        .await
        .with_context(|| format!("writing {}", out.display()))?;
    println!("{} bytes written to {}", bytes.len(), out.display());
    Ok(())
}

/// Maps a device command to its orchestrator operation.
fn operation(command: Command) -> anyhow::Result<Operation> {
    Ok(match command {
        Command::Status => Operation::GetStatus,
        Command::Setting { name, value } => {
            let setting: Setting = name.parse()?;
            match value {
                Some(value) => Operation::WriteSetting(SettingValue::from_control_bytes(
                    setting,
                    value.as_bytes(),
                )?),
                None => Operation::ReadSetting(setting),
            }
        }
        Command::Capture => Operation::CapturePhoto,
        Command::Record { seconds } => Operation::RecordVideo { seconds },
        Command::Media { kind } => match kind {
            MediaArg::Photos => Operation::ListPhotos,
            MediaArg::Videos => Operation::ListVideos,
        },
        Command::Delete { kind, id } => match kind {
            MediaArg::Photos => Operation::DeletePhoto { id },
            MediaArg::Videos => Operation::DeleteVideo { id },
        },
        Command::Notes { text: Some(text) } => Operation::AddNote { text },
        Command::Notes { text: None } => Operation::RecentNotes,
        Command::Todos {
            task: Some(task),
            priority,
        } => Operation::AddTodo {
            task,
            priority: priority.into(),
        },
        Command::Todos { task: None, .. } => Operation::RecentTodos,
        Command::Conversation { clear: true } => Operation::ClearConversation,
        Command::Conversation { clear: false } => Operation::GetConversation,
        Command::System { command } => Operation::System(command.into()),
        other => bail!("{other:?} is not a device operation"),
    })
}

fn render(output: &OperationOutput) -> anyhow::Result<String> {
    Ok(match output {
        OperationOutput::Done => "ok".into(),
        OperationOutput::Ack(ack) => serde_json::to_string_pretty(ack)?,
        OperationOutput::Action(action) => serde_json::to_string_pretty(action)?,
        OperationOutput::Capture(capture) => serde_json::to_string_pretty(capture)?,
        OperationOutput::Setting(value) => {
            String::from_utf8_lossy(&value.to_control_bytes()?).into_owned()
        }
        OperationOutput::Settings(settings) => serde_json::to_string_pretty(settings)?,
        OperationOutput::Status(status) => serde_json::to_string_pretty(status)?,
        OperationOutput::Notes(notes) => serde_json::to_string_pretty(notes)?,
        OperationOutput::Todos(todos) => serde_json::to_string_pretty(todos)?,
        OperationOutput::Media(items) => serde_json::to_string_pretty(items)?,
        OperationOutput::Bytes(bytes) => format!("{} bytes", bytes.len()),
        OperationOutput::Conversation(messages) => serde_json::to_string_pretty(messages)?,
    })
}

async fn pair(
    orch: &Orchestrator,
    code: Option<String>,
    peer_id: Option<String>,
) -> anyhow::Result<()> {
    if let Some(cred) = orch.credential().await {
        bail!(
            "already paired with {}; run `glasslink unpair` first",
            cred.device_id
        );
    }

    let peer = choose_peer(orch, peer_id.as_deref()).await?;
    info!(peer = %peer.id, name = ?peer.name, "opening control link");
    orch.open(&peer).await?;

    let shown = orch.begin_pairing().await?;
    info!(code = %shown, "pairing session started");

    let interactive = code.is_none();
    let mut code = code;
    loop {
        let attempt = match code.take() {
            Some(code) => code,
            None => prompt("Enter the code shown on the glasses: ").await?,
        };
        match orch.pair(&attempt).await {
            Ok(device) => {
                println!(
                    "paired with {} ({})",
                    device.display_name.as_deref().unwrap_or("glasses"),
                    device.device_id
                );
                return Ok(());
            }
            Err(ConnectionError::PairingFailed(PairingFailure::InvalidCode {
                attempts_remaining,
            })) if interactive => {
                println!("wrong code, {attempts_remaining} attempts left");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn choose_peer(orch: &Orchestrator, id: Option<&str>) -> anyhow::Result<PeerDescriptor> {
    let peers = orch.discover(orch.config().discovery_timeout()).await?;
    let found = match id {
        Some(id) => {
            let mut peers = peers.filter(|p| futures_util::future::ready(p.id == id));
            peers.next().await
        }
        None => peers
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .max_by_key(|p| p.rssi.unwrap_or(i16::MIN)),
    };
    found.context("no glasses found nearby")
}

async fn prompt(message: &str) -> anyhow::Result<String> {
    let message = message.to_string();
    tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
        print!("{message}");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await?
}

/// Reconnects with backoff until a link is up.
async fn connect(orch: &Orchestrator, attempts: u32) -> anyhow::Result<()> {
    if orch.credential().await.is_none() {
        bail!("not paired; run `glasslink pair` first");
    }
    if matches!(
        orch.state().await,
        ConnectionState::ControlOnly | ConnectionState::DataAvailable
    ) {
        return Ok(());
    }

    let backoff = ReconnectConfig::default();
    let mut attempt = 0;
    loop {
        match orch.reconnect().await {
            ReconnectOutcome::DataLink | ReconnectOutcome::ControlLink => return Ok(()),
            ReconnectOutcome::Cancelled => bail!("connection cancelled"),
            ReconnectOutcome::Unreachable => {}
        }
        attempt += 1;
        if attempts > 0 && attempt >= attempts {
            bail!("glasses unreachable after {attempt} attempts");
        }
        let delay = backoff.delay_for_attempt(attempt);
        warn!(attempt, delay_ms = delay.as_millis() as u64, "glasses unreachable, retrying");
        tokio::time::sleep(delay).await;
    }
}

async fn stay_connected(
    orch: &Arc<Orchestrator>,
    mut events: mpsc::Receiver<ConnectionEvent>,
    attempts: u32,
) -> anyhow::Result<()> {
    orch.start().await;
    let mut reconnecting: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received, shutting down");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                log_event(&event);
                let lost = matches!(
                    event,
                    ConnectionEvent::StateChanged { to: ConnectionState::Disconnected, .. }
                );
                let idle = reconnecting.as_ref().is_none_or(|task| task.is_finished());
                if lost && idle {
                    let orch = Arc::clone(orch);
                    reconnecting = Some(tokio::spawn(async move {
                        if let Err(e) = connect(&orch, attempts).await {
                            warn!(error = %e, "giving up on reconnect");
                        }
                    }));
                }
            }
        }
    }

    if let Some(task) = reconnecting {
        task.abort();
    }
    Ok(())
}

async fn log_events(mut events: mpsc::Receiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        log_event(&event);
    }
}

fn log_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::StateChanged { from, to } => info!(%from, %to, "connection state"),
        ConnectionEvent::Paired { device } => info!(device = %device.device_id, "paired"),
        ConnectionEvent::PairingCode { code } => info!(%code, "pairing code"),
        ConnectionEvent::Notification(n) => info!(notification = ?n, "glasses"),
        ConnectionEvent::Reconnect(outcome) => info!(?outcome, "reconnect"),
    }
}
