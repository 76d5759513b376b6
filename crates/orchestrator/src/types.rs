//! Public types for the connection orchestrator.

use std::fmt;
use std::time::Duration;

use glasslink_protocol::{ActionResponse, Characteristic, NetworkStatus, PairingStatus, StatusMode};

use crate::store::Entries;

/// Reachability of the paired glasses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No credential.
    Unpaired,
    /// A pairing session is in progress.
    Pairing,
    /// Paired, control link open, data link not promoted.
    ControlOnly,
    /// Data link promoted and probed.
    DataAvailable,
    /// Paired, no usable link.
    Disconnected,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    ControlOpened { paired: bool },
    ControlLost { data_up: bool },
    PairingStarted,
    PairingSucceeded,
    PairingAbandoned,
    DataPromoted,
    DataLost { control_up: bool },
    Disconnect,
    Unpair,
}

impl ConnectionState {
    /// Total transition function. Events that do not apply to a state
    /// leave it unchanged.
    pub const fn next(self, event: StateEvent) -> Self {
        use ConnectionState::*;
        use StateEvent as E;

        match (self, event) {
            (_, E::Unpair) => Unpaired,
            (_, E::Disconnect) => Disconnected,

            (Disconnected, E::ControlOpened { paired: true }) => ControlOnly,
            (Disconnected, E::ControlOpened { paired: false }) => Unpaired,
            (s, E::ControlOpened { .. }) => s,

            (DataAvailable, E::ControlLost { data_up: true }) => DataAvailable,
            (_, E::ControlLost { .. }) => Disconnected,

            (Unpaired | Disconnected, E::PairingStarted) => Pairing,
            (s, E::PairingStarted) => s,

            (Pairing, E::PairingSucceeded) => ControlOnly,
            (s, E::PairingSucceeded) => s,

            (Pairing, E::PairingAbandoned) => Unpaired,
            (s, E::PairingAbandoned) => s,

            (ControlOnly | Disconnected, E::DataPromoted) => DataAvailable,
            (s, E::DataPromoted) => s,

            (DataAvailable, E::DataLost { control_up: true }) => ControlOnly,
            (DataAvailable, E::DataLost { control_up: false }) => Disconnected,
            (s, E::DataLost { .. }) => s,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unpaired => "unpaired",
            Self::Pairing => "pairing",
            Self::ControlOnly => "control-only",
            Self::DataAvailable => "data-available",
            Self::Disconnected => "disconnected",
        })
    }
}

/// The paired peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub device_id: String,
    pub display_name: Option<String>,
}

/// Transport last known to work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PreferredTransport {
    #[default]
    Control,
    Data,
}

impl PreferredTransport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Data => "data",
        }
    }
}

/// Authorization for the data link.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub device_id: String,
    pub api_key: String,
    pub ip_address: Option<String>,
    pub preferred_transport: PreferredTransport,
}

const KEY_DEVICE_ID: &str = "device_id";
const KEY_API_KEY: &str = "api_key";
const KEY_IP_ADDRESS: &str = "ip_address";
const KEY_PREFERRED_TRANSPORT: &str = "preferred_transport";

impl Credential {
    /// Rebuilds a credential from stored entries.
    ///
    /// Returns `None` unless both the device id and the API key are present.
    pub fn from_entries(entries: &Entries) -> Option<Self> {
        let non_empty = |key: &str| entries.get(key).filter(|v| !v.is_empty()).cloned();
        Some(Self {
            device_id: non_empty(KEY_DEVICE_ID)?,
            api_key: non_empty(KEY_API_KEY)?,
            ip_address: non_empty(KEY_IP_ADDRESS),
            preferred_transport: match entries.get(KEY_PREFERRED_TRANSPORT).map(String::as_str) {
                Some("data") => PreferredTransport::Data,
                _ => PreferredTransport::Control,
            },
        })
    }

    pub fn to_entries(&self) -> Entries {
        let mut entries = Entries::new();
        entries.insert(KEY_DEVICE_ID.into(), self.device_id.clone());
        entries.insert(KEY_API_KEY.into(), self.api_key.clone());
        if let Some(ip) = &self.ip_address {
            entries.insert(KEY_IP_ADDRESS.into(), ip.clone());
        }
        entries.insert(
            KEY_PREFERRED_TRANSPORT.into(),
            self.preferred_transport.as_str().into(),
        );
        entries
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("device_id", &self.device_id)
            .field("api_key", &"<redacted>")
            .field("ip_address", &self.ip_address)
            .field("preferred_transport", &self.preferred_transport)
            .finish()
    }
}

/// Result of a single [`reconnect`](crate::Orchestrator::reconnect) attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    DataLink,
    ControlLink,
    Unreachable,
    Cancelled,
}

/// A value pushed by the peer, decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerNotification {
    PairingCode(String),
    PairingStatus(PairingStatus),
    Mode(StatusMode),
    StatusMessage(String),
    Action(ActionResponse),
    Network(NetworkStatus),
    Battery(u8),
    /// Any other notifying characteristic, undecoded.
    Raw {
        characteristic: Characteristic,
        value: Vec<u8>,
    },
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Pairing completed and the credential is persisted.
    Paired { device: Device },
    /// The peer's pairing code, read when a session begins.
    PairingCode { code: String },
    Notification(PeerNotification),
    Reconnect(ReconnectOutcome),
}

/// Exponential backoff for callers that retry
/// [`reconnect`](crate::Orchestrator::reconnect).
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
        }
    }
}

/// Fraction of a reconnect delay that is randomized either way.
const RECONNECT_JITTER: f64 = 0.25;

/// Floor for any reconnect delay, in seconds.
const MIN_RECONNECT_DELAY_SECS: f64 = 0.05;

impl ReconnectConfig {
    /// How long a caller should wait before its `attempt`th call to
    /// `reconnect()`, counting from 1.
    ///
    /// The nominal delay grows by `backoff_factor` per attempt until it
    /// reaches `max_delay`; the returned value lies within
    /// `RECONNECT_JITTER` of it so that several companions drift apart.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let steps = attempt.max(1).saturating_sub(1).min(63) as i32;
        let nominal = (self.initial_delay.as_secs_f64() * self.backoff_factor.powi(steps))
            .min(self.max_delay.as_secs_f64());
        let scale = 1.0 + RECONNECT_JITTER * unit_noise();
        Duration::from_secs_f64((nominal * scale).max(MIN_RECONNECT_DELAY_SECS))
    }
}

/// Cheap noise in `[-1, 1)` taken from the clock's sub-second part.
fn unit_noise() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos) / 500_000_000.0 - 1.0
}
