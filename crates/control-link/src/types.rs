//! Public types for the control link.

use glasslink_protocol::Characteristic;
use uuid::Uuid;

/// A peer seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    /// Stable radio identifier of the peer.
    pub id: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Signal strength at the time of the advertisement.
    pub rssi: Option<i16>,
}

/// A raw value pushed by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattNotification {
    pub uuid: Uuid,
    pub value: Vec<u8>,
}

/// Events emitted while a channel is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// A notifying characteristic changed on the peer.
    ValueChanged {
        characteristic: Characteristic,
        value: Vec<u8>,
    },
    /// The channel dropped without [`close`](crate::ControlLink::close).
    Disconnected { peer_id: String },
}
